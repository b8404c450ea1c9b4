// src/utils/system.rs: System functions

use log::warn;
use sysinfo::System;

/// Caps the requested worker threads at the physical core count.
///
/// # Arguments
///
/// * `requested` - Value of `--threads`.
///
/// # Returns
/// Thread count passed to every tool, at least 1.
pub fn effective_threads(requested: usize) -> usize {
    let physical_cores = System::physical_core_count().unwrap_or(1);
    let threads = clamp_threads(requested, physical_cores);
    if threads < requested {
        warn!(
            "Requested {} threads but only {} physical cores are available; using {}",
            requested, physical_cores, threads
        );
    }
    threads
}

fn clamp_threads(requested: usize, physical_cores: usize) -> usize {
    requested.min(physical_cores.max(1)).max(1)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_threads() {
        assert_eq!(clamp_threads(4, 16), 4);
        assert_eq!(clamp_threads(32, 8), 8);
        assert_eq!(clamp_threads(0, 8), 1);
        assert_eq!(clamp_threads(4, 0), 1);
    }

    #[test]
    fn test_effective_threads_bounds() {
        let threads = effective_threads(10_000);
        assert!(threads >= 1);
        assert!(threads < 10_000);
        assert_eq!(effective_threads(1), 1);
    }
}
