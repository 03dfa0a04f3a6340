//! CPU topology detection and thread placement
//!
//! Detects logical CPU count, NUMA node count, and the logical CPU class
//! (performance / efficiency) of each core on hybrid processors, then
//! offers best-effort thread pinning. Correctness never depends on any
//! of this being available; every probe degrades to a uniform topology.

use std::cell::Cell;
use std::sync::OnceLock;

use tracing::debug;

/// Logical CPU class on hybrid processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuClass {
    /// Full-width core; all dispatch variants permitted.
    Performance,
    /// Density-optimized core; AVX-512 is off-limits with modern
    /// microcode, so dispatch caps at AVX2 here.
    Efficiency,
}

/// Process-wide CPU topology snapshot, probed once.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    /// Logical CPU count.
    pub logical_cpus: usize,
    /// NUMA node count (1 when undetectable).
    pub numa_nodes: usize,
    /// Per-CPU class, indexed by logical id. Uniform topologies report
    /// every CPU as Performance.
    pub classes: Vec<CpuClass>,
}

impl CpuTopology {
    /// Whether the processor mixes performance and efficiency cores.
    #[must_use]
    pub fn is_hybrid(&self) -> bool {
        self.classes.iter().any(|c| *c == CpuClass::Efficiency)
    }

    /// Logical ids of all CPUs of the given class.
    #[must_use]
    pub fn cpus_of_class(&self, class: CpuClass) -> Vec<usize> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == class)
            .map(|(id, _)| id)
            .collect()
    }
}

static TOPOLOGY: OnceLock<CpuTopology> = OnceLock::new();

thread_local! {
    static THREAD_CLASS: Cell<Option<CpuClass>> = const { Cell::new(None) };
}

/// The cached process topology.
pub fn topology() -> &'static CpuTopology {
    TOPOLOGY.get_or_init(detect)
}

fn detect() -> CpuTopology {
    let logical_cpus = num_cpus::get();
    let numa_nodes = detect_numa_nodes().max(1);
    let classes = detect_classes(logical_cpus);
    let topo = CpuTopology {
        logical_cpus,
        numa_nodes,
        classes,
    };
    debug!(
        cpus = topo.logical_cpus,
        numa = topo.numa_nodes,
        hybrid = topo.is_hybrid(),
        "probed cpu topology"
    );
    topo
}

#[cfg(target_os = "linux")]
fn detect_numa_nodes() -> usize {
    let Ok(entries) = std::fs::read_dir("/sys/devices/system/node") else {
        return 1;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with("node") && name[4..].chars().all(|c| c.is_ascii_digit())
        })
        .count()
}

#[cfg(not(target_os = "linux"))]
fn detect_numa_nodes() -> usize {
    1
}

/// Classifies each logical CPU.
///
/// On Linux the scheduler exposes `cpu_capacity` per CPU on asymmetric
/// systems; CPUs below the maximum capacity are efficiency cores. When
/// the attribute is missing the topology is treated as uniform.
#[cfg(target_os = "linux")]
fn detect_classes(logical_cpus: usize) -> Vec<CpuClass> {
    let capacities: Vec<Option<u64>> = (0..logical_cpus)
        .map(|id| {
            std::fs::read_to_string(format!("/sys/devices/system/cpu/cpu{id}/cpu_capacity"))
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
        })
        .collect();

    let max_capacity = capacities.iter().flatten().copied().max();
    match max_capacity {
        Some(max) => capacities
            .iter()
            .map(|cap| match cap {
                Some(c) if *c < max => CpuClass::Efficiency,
                _ => CpuClass::Performance,
            })
            .collect(),
        None => vec![CpuClass::Performance; logical_cpus],
    }
}

#[cfg(not(target_os = "linux"))]
fn detect_classes(logical_cpus: usize) -> Vec<CpuClass> {
    vec![CpuClass::Performance; logical_cpus]
}

/// Pins the calling thread to CPUs of the requested class.
///
/// Returns whether the affinity call succeeded. On failure (or on
/// platforms without an affinity syscall) the thread keeps its previous
/// mask but the requested class is still recorded for dispatch gating.
pub fn pin_current_thread(class: CpuClass) -> bool {
    let cpus = topology().cpus_of_class(class);
    let cpus = if cpus.is_empty() {
        (0..topology().logical_cpus).collect()
    } else {
        cpus
    };
    let pinned = set_affinity(&cpus);
    THREAD_CLASS.with(|c| c.set(Some(class)));
    debug!(?class, pinned, "thread placement requested");
    pinned
}

/// Class the calling thread was last pinned to, if any.
#[must_use]
pub fn current_thread_class() -> Option<CpuClass> {
    THREAD_CLASS.with(Cell::get)
}

/// Whether the calling thread may select AVX-512 dispatch variants.
///
/// On hybrid processors a thread is only eligible after being placed on
/// performance cores; unpinned threads may migrate onto an efficiency
/// core mid-operation, so they are capped at AVX2.
#[must_use]
pub fn thread_allows_avx512() -> bool {
    if !topology().is_hybrid() {
        return true;
    }
    current_thread_class() == Some(CpuClass::Performance)
}

#[cfg(target_os = "linux")]
fn set_affinity(cpus: &[usize]) -> bool {
    // SAFETY: cpu_set_t is a plain bitmask; CPU_* are libc macros over it.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &cpu in cpus {
            if cpu < libc::CPU_SETSIZE as usize {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_cpus: &[usize]) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_reports_at_least_one_cpu() {
        let topo = topology();
        assert!(topo.logical_cpus >= 1);
        assert!(topo.numa_nodes >= 1);
        assert_eq!(topo.classes.len(), topo.logical_cpus);
    }

    #[test]
    fn pinning_records_thread_class() {
        pin_current_thread(CpuClass::Performance);
        assert_eq!(current_thread_class(), Some(CpuClass::Performance));
        assert!(thread_allows_avx512());
    }
}
