//! System-load input for the adaptive rate limiter

use tracing::warn;

/// Source of the load feedback signal, scaled to 0..100
///
/// Kept behind a trait so tests pin the load and non-Linux hosts can plug
/// in their own probe.
#[cfg_attr(test, mockall::automock)]
pub trait LoadProvider: Send + Sync {
    fn load_percent(&self) -> f64;
}

/// Constant load, for tests and environments without a probe
pub struct FixedLoad(pub f64);

impl LoadProvider for FixedLoad {
    fn load_percent(&self) -> f64 {
        self.0
    }
}

/// 1-minute load average divided by CPU count, from `/proc/loadavg`
#[derive(Default)]
pub struct ProcLoadAverage;

impl LoadProvider for ProcLoadAverage {
    fn load_percent(&self) -> f64 {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;
        match std::fs::read_to_string("/proc/loadavg") {
            Ok(content) => content
                .split_whitespace()
                .next()
                .and_then(|first| first.parse::<f64>().ok())
                .map(|one_minute| (one_minute / cpus * 100.0).clamp(0.0, 100.0))
                .unwrap_or(0.0),
            Err(e) => {
                warn!("could not read /proc/loadavg: {}", e);
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_load() {
        assert_eq!(FixedLoad(42.0).load_percent(), 42.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_load_average_in_bounds() {
        let load = ProcLoadAverage.load_percent();
        assert!((0.0..=100.0).contains(&load));
    }
}
