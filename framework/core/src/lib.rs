mod duration;
mod shutdown;

pub mod prelude {
    pub use crate::duration::{parse_duration, DurationParseError};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownReason};
}
