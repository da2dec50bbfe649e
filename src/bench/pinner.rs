//! Topology-aware thread pinning.
//!
//! The pinner reads the CPU topology from sysfs, groups logical CPUs by
//! package, core, and SMT sibling rank, and lays out a pinning order
//! according to the hyperthreading policy:
//!
//! - `hyperthreading = true`: exhaust one package completely (all first
//!   siblings, then all second siblings) before moving to the next socket.
//! - `hyperthreading = false`: use one sibling of every core across all
//!   sockets before touching any hyperthread.
//!
//! Workers pin themselves on startup; pinning failures degrade to a
//! warning so the benchmark still runs on unsupported platforms.

use std::fmt;

/// Where one worker ended up.
#[derive(Copy, Clone, Debug)]
pub struct ProcessorInfo {
    pub user_id: usize,
    pub cpu: usize,
    pub package: usize,
    pub core: usize,
    pub smt_index: usize,
}

impl fmt::Display for ProcessorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} -> cpu {} (package {}, core {}, smt {})",
            self.user_id, self.cpu, self.package, self.core, self.smt_index
        )
    }
}

#[derive(Copy, Clone, Debug)]
struct CpuSlot {
    cpu: usize,
    package: usize,
    core: usize,
    smt_index: usize,
}

pub struct ThreadPinner {
    plan: Vec<CpuSlot>,
}

impl ThreadPinner {
    pub fn new(hyperthreading_before_socket_switch: bool) -> Self {
        let mut slots = discover_topology();
        if hyperthreading_before_socket_switch {
            slots.sort_by_key(|s| (s.package, s.smt_index, s.core, s.cpu));
        } else {
            slots.sort_by_key(|s| (s.smt_index, s.package, s.core, s.cpu));
        }
        Self { plan: slots }
    }

    /// Pins the calling thread to the slot assigned to `worker`, wrapping
    /// when there are more workers than CPUs. Failures warn and continue
    /// unpinned.
    pub fn pin_current(&self, worker: usize) -> ProcessorInfo {
        let slot = self.plan[worker % self.plan.len()];
        if let Err(err) = pin_to_cpu(slot.cpu) {
            eprintln!("warning: failed to pin worker {worker} to cpu {}: {err}", slot.cpu);
        }
        ProcessorInfo {
            user_id: worker,
            cpu: slot.cpu,
            package: slot.package,
            core: slot.core,
            smt_index: slot.smt_index,
        }
    }

    pub fn num_cpus(&self) -> usize {
        self.plan.len()
    }
}

cfg_if! {
    if #[cfg(target_os = "linux")] {
        use std::fs;
        use std::io;
        use std::path::Path;

        fn read_topology_value(cpu: usize, leaf: &str) -> Option<usize> {
            let path = format!("/sys/devices/system/cpu/cpu{cpu}/topology/{leaf}");
            fs::read_to_string(path).ok()?.trim().parse().ok()
        }

        fn discover_topology() -> Vec<CpuSlot> {
            let mut raw = Vec::new();
            let mut cpu = 0;
            while Path::new(&format!("/sys/devices/system/cpu/cpu{cpu}")).exists() {
                let package = read_topology_value(cpu, "physical_package_id");
                let core = read_topology_value(cpu, "core_id");
                match (package, core) {
                    (Some(package), Some(core)) => raw.push((cpu, package, core)),
                    _ => break,
                }
                cpu += 1;
            }
            if raw.is_empty() {
                return fallback_topology();
            }

            // SMT sibling rank: position among the CPUs sharing a core.
            let mut slots: Vec<CpuSlot> = raw
                .iter()
                .map(|&(cpu, package, core)| {
                    let smt_index = raw
                        .iter()
                        .filter(|&&(other, p, c)| p == package && c == core && other < cpu)
                        .count();
                    CpuSlot {
                        cpu,
                        package,
                        core,
                        smt_index,
                    }
                })
                .collect();
            slots.sort_by_key(|s| s.cpu);
            slots
        }

        fn pin_to_cpu(cpu: usize) -> io::Result<()> {
            // A cpu index past the mask capacity would index out of the set.
            if cpu >= std::mem::size_of::<libc::cpu_set_t>() * 8 {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "cpu out of range"));
            }
            unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                libc::CPU_SET(cpu, &mut set);
                let rc = libc::pthread_setaffinity_np(
                    libc::pthread_self(),
                    std::mem::size_of::<libc::cpu_set_t>(),
                    &set,
                );
                if rc != 0 {
                    return Err(io::Error::from_raw_os_error(rc));
                }
            }
            Ok(())
        }
    } else {
        fn discover_topology() -> Vec<CpuSlot> {
            fallback_topology()
        }

        fn pin_to_cpu(_cpu: usize) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "thread affinity is not supported on this platform",
            ))
        }
    }
}

/// Flat identity topology when sysfs is unavailable.
fn fallback_topology() -> Vec<CpuSlot> {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (0..cpus)
        .map(|cpu| CpuSlot {
            cpu,
            package: 0,
            core: cpu,
            smt_index: 0,
        })
        .collect()
}
