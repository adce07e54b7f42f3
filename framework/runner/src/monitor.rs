use surge_core::prelude::DelegatedShutdownListener;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// CPU usage of this process, as a share of all cores, above which a warning is logged.
const HIGH_CPU_PERCENT: f32 = 10.0;

/// Monitor the resource usage of the load generator and report high usage.
///
/// Note that this won't stop the run, it just logs a warning so the user knows that latency
/// measurements may be inflated by the generator itself being saturated.
///
/// The CPU usage for the process is collected every [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL] and
/// checked.
pub(crate) fn start_monitor(shutdown_listener: DelegatedShutdownListener) {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();

            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len().max(1);

            loop {
                if shutdown_listener.should_shutdown() {
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                let Some(process) = sys.process(this_process_pid) else {
                    log::warn!("Could not read process info, resource monitoring is disabled");
                    break;
                };

                let usage = (process.cpu_usage() / (cpu_count * 100) as f32) * 100.0;
                if usage > HIGH_CPU_PERCENT {
                    log::warn!(
                        "High CPU usage detected. The load generator is using {usage:.2}% of the CPU, with {cpu_count} available cores"
                    );
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
        })
        .expect("Failed to start monitor thread");
}
