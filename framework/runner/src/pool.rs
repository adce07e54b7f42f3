use std::sync::Arc;

use parking_lot::Mutex;

/// A virtual user. A VU belongs to one scenario and runs at most one iteration at a time.
#[derive(Debug)]
pub(crate) struct Vu {
    pub(crate) id: usize,
    /// Iterations this VU has started
    pub(crate) iterations: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Vu>,
    allocated: usize,
    in_use: usize,
    peak_in_use: usize,
}

/// The VUs for one scenario. The pool starts with the pre-allocated VUs and grows on demand up
/// to `max`.
#[derive(Debug)]
pub(crate) struct VuPool {
    max: usize,
    state: Mutex<PoolState>,
}

impl VuPool {
    pub(crate) fn new(pre_allocated: usize, max: usize) -> Arc<Self> {
        let max = max.max(pre_allocated);
        let idle = (1..=pre_allocated)
            .rev()
            .map(|id| Vu { id, iterations: 0 })
            .collect();

        Arc::new(Self {
            max,
            state: Mutex::new(PoolState {
                idle,
                allocated: pre_allocated,
                ..Default::default()
            }),
        })
    }

    /// Take an idle VU, creating one if none is idle and the pool is below its maximum.
    ///
    /// The VU goes back to the pool when the returned lease is dropped.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<VuLease> {
        let mut state = self.state.lock();
        let vu = match state.idle.pop() {
            Some(vu) => vu,
            None if state.allocated < self.max => {
                state.allocated += 1;
                log::debug!("Allocated VU {}", state.allocated);
                Vu {
                    id: state.allocated,
                    iterations: 0,
                }
            }
            None => return None,
        };

        state.in_use += 1;
        state.peak_in_use = state.peak_in_use.max(state.in_use);

        Some(VuLease {
            pool: self.clone(),
            vu: Some(vu),
        })
    }

    pub(crate) fn allocated(&self) -> usize {
        self.state.lock().allocated
    }

    pub(crate) fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    pub(crate) fn peak_in_use(&self) -> usize {
        self.state.lock().peak_in_use
    }

    fn release(&self, vu: Vu) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        state.idle.push(vu);
    }
}

/// Exclusive use of a VU. Dropping the lease returns the VU to its pool.
#[derive(Debug)]
pub(crate) struct VuLease {
    pool: Arc<VuPool>,
    vu: Option<Vu>,
}

impl VuLease {
    pub(crate) fn id(&self) -> usize {
        self.vu.as_ref().map(|vu| vu.id).unwrap_or_default()
    }

    /// Count a new iteration on this VU and return its 1-based number.
    pub(crate) fn next_iteration(&mut self) -> u64 {
        match self.vu.as_mut() {
            Some(vu) => {
                vu.iterations += 1;
                vu.iterations
            }
            None => 0,
        }
    }
}

impl Drop for VuLease {
    fn drop(&mut self) {
        if let Some(vu) = self.vu.take() {
            self.pool.release(vu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_up_to_max() {
        let pool = VuPool::new(1, 3);
        assert_eq!(1, pool.allocated());

        let leases = (0..3).map(|_| pool.try_acquire().unwrap()).collect::<Vec<_>>();
        assert_eq!(3, pool.allocated());
        assert_eq!(3, pool.in_use());
        assert!(pool.try_acquire().is_none());

        let mut ids = leases.iter().map(|l| l.id()).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(vec![1, 2, 3], ids);
    }

    #[test]
    fn released_vus_are_reused() {
        let pool = VuPool::new(2, 2);

        let mut lease = pool.try_acquire().unwrap();
        let id = lease.id();
        assert_eq!(1, lease.next_iteration());
        drop(lease);
        assert_eq!(0, pool.in_use());

        let mut lease = pool.try_acquire().unwrap();
        assert_eq!(id, lease.id());
        assert_eq!(2, lease.next_iteration());
        assert_eq!(2, pool.allocated());
        assert_eq!(1, pool.peak_in_use());
    }

    #[test]
    fn tracks_peak_concurrency() {
        let pool = VuPool::new(5, 5);

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        drop(first);
        let third = pool.try_acquire().unwrap();
        drop(second);
        drop(third);

        assert_eq!(2, pool.peak_in_use());
        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn max_below_pre_allocated_is_raised() {
        let pool = VuPool::new(4, 2);
        let leases = (0..5).filter_map(|_| pool.try_acquire()).collect::<Vec<_>>();
        assert_eq!(4, leases.len());
    }
}
