//! Host resource sampling and point-in-time safety gates.
//!
//! The guard is consulted at fixed checkpoints (before a run, before each
//! task, before each load). It is not a background monitor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::types::ResourceSample;

/// Source of host resource readings.
///
/// The system probe reads the live host; tests inject fixed readings.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> Result<ResourceSample>;

    /// Memory usage alone, for gates that need nothing else.
    fn memory_pct(&self) -> Result<f64> {
        self.sample().map(|s| s.memory_pct)
    }
}

/// Probe backed by `sysinfo`.
///
/// Disk usage is measured on the filesystem holding the staging directory.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    staging_dir: PathBuf,
    cpu_interval: Duration,
}

impl SystemProbe {
    /// CPU usage is averaged over this window by default.
    pub const DEFAULT_CPU_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            cpu_interval: Self::DEFAULT_CPU_INTERVAL,
        }
    }

    /// Set the CPU sampling window. Clamped to the minimum `sysinfo` supports.
    pub fn with_cpu_interval(mut self, interval: Duration) -> Self {
        self.cpu_interval = interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        self
    }

    fn used_memory_pct(system: &System) -> f64 {
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64 * 100.0
    }

    fn disk_pct(&self) -> Result<f64> {
        let disks = Disks::new_with_refreshed_list();
        let staging = self
            .staging_dir
            .canonicalize()
            .unwrap_or_else(|_| self.staging_dir.clone());

        // Longest mount point that contains the staging directory.
        let disk = disks
            .list()
            .iter()
            .filter(|d| staging.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                EtlError::Internal(format!(
                    "no mounted filesystem found for {}",
                    staging.display()
                ))
            })?;

        let total = disk.total_space();
        if total == 0 {
            return Ok(0.0);
        }
        let used = total.saturating_sub(disk.available_space());
        Ok(used as f64 / total as f64 * 100.0)
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> Result<ResourceSample> {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        std::thread::sleep(self.cpu_interval);
        system.refresh_cpu_usage();

        Ok(ResourceSample {
            memory_pct: Self::used_memory_pct(&system),
            cpu_pct: system.global_cpu_usage() as f64,
            disk_pct: self.disk_pct()?,
        })
    }

    fn memory_pct(&self) -> Result<f64> {
        let mut system = System::new();
        system.refresh_memory();
        Ok(Self::used_memory_pct(&system))
    }
}

/// Probe returning the same reading every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub ResourceSample);

impl FixedProbe {
    pub fn new(memory_pct: f64, cpu_pct: f64, disk_pct: f64) -> Self {
        Self(ResourceSample {
            memory_pct,
            cpu_pct,
            disk_pct,
        })
    }

    /// A quiet host.
    pub fn idle() -> Self {
        Self::new(20.0, 5.0, 30.0)
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> Result<ResourceSample> {
        Ok(self.0)
    }
}

/// Point-in-time gate over a [`ResourceProbe`].
#[derive(Clone)]
pub struct ResourceGuard {
    probe: Arc<dyn ResourceProbe>,
    memory_high_water: f64,
    disk_high_water: f64,
}

static_assertions::assert_impl_all!(ResourceGuard: Send, Sync);

impl ResourceGuard {
    pub fn new(probe: Arc<dyn ResourceProbe>, memory_high_water: f64, disk_high_water: f64) -> Self {
        Self {
            probe,
            memory_high_water,
            disk_high_water,
        }
    }

    /// Guard over the live host, measuring disk usage at `staging_dir`.
    pub fn system(staging_dir: &Path, memory_high_water: f64, disk_high_water: f64) -> Self {
        Self::new(
            Arc::new(SystemProbe::new(staging_dir)),
            memory_high_water,
            disk_high_water,
        )
    }

    /// Take a reading.
    pub fn sample(&self) -> Result<ResourceSample> {
        let sample = self.probe.sample()?;
        debug!(
            "Resources: memory {:.1}%, cpu {:.1}%, disk {:.1}%",
            sample.memory_pct, sample.cpu_pct, sample.disk_pct
        );
        Ok(sample)
    }

    /// Current memory usage, without the CPU window or the disk lookup.
    pub fn memory_pct(&self) -> Result<f64> {
        self.probe.memory_pct()
    }

    /// Fail with `ResourceExhausted` if memory usage is above `ceiling`.
    ///
    /// Returns the memory reading on success.
    pub fn check_memory(&self, ceiling: f64) -> Result<f64> {
        let memory_pct = self.memory_pct()?;
        if memory_pct > ceiling {
            return Err(EtlError::ResourceExhausted(format!(
                "memory usage {:.1}% is above the {:.1}% ceiling",
                memory_pct, ceiling
            )));
        }
        Ok(memory_pct)
    }

    /// Fail with `ResourceExhausted` if memory or staging disk usage is above
    /// its high-water mark.
    pub fn check_preflight(&self) -> Result<ResourceSample> {
        let sample = self.sample()?;
        info!(
            "System resources: memory {:.1}%, cpu {:.1}%, disk {:.1}%",
            sample.memory_pct, sample.cpu_pct, sample.disk_pct
        );

        if sample.memory_pct > self.memory_high_water {
            return Err(EtlError::ResourceExhausted(format!(
                "memory usage at critical level: {:.1}%",
                sample.memory_pct
            )));
        }
        if sample.disk_pct > self.disk_high_water {
            return Err(EtlError::ResourceExhausted(format!(
                "staging disk nearly full: {:.1}%",
                sample.disk_pct
            )));
        }
        Ok(sample)
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("memory_high_water", &self.memory_high_water)
            .field("disk_high_water", &self.disk_high_water)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(memory: f64, disk: f64) -> ResourceGuard {
        ResourceGuard::new(Arc::new(FixedProbe::new(memory, 10.0, disk)), 90.0, 90.0)
    }

    #[test]
    fn test_preflight_passes_on_idle_host() {
        let sample = guard(40.0, 50.0).check_preflight().unwrap();
        assert_eq!(sample.memory_pct, 40.0);
    }

    #[test]
    fn test_preflight_memory_breach() {
        let err = guard(95.0, 50.0).check_preflight().unwrap_err();
        assert!(err.is_resource_exhausted());
        assert!(err.to_string().contains("95.0%"));
    }

    #[test]
    fn test_preflight_disk_breach() {
        let err = guard(40.0, 91.0).check_preflight().unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_high_water_mark_is_exclusive() {
        assert!(guard(90.0, 90.0).check_preflight().is_ok());
    }

    #[test]
    fn test_check_memory_ceiling() {
        let guard = guard(86.0, 10.0);
        assert!(guard.check_memory(85.0).unwrap_err().is_resource_exhausted());
        assert!(guard.check_memory(90.0).is_ok());
    }

    /// Reads memory fine but has no disk to report on.
    struct NoDiskProbe;

    impl ResourceProbe for NoDiskProbe {
        fn sample(&self) -> Result<ResourceSample> {
            Err(EtlError::Internal("no mounted filesystem found".to_string()))
        }

        fn memory_pct(&self) -> Result<f64> {
            Ok(42.0)
        }
    }

    #[test]
    fn test_check_memory_skips_full_sample() {
        let guard = ResourceGuard::new(Arc::new(NoDiskProbe), 90.0, 90.0);
        assert_eq!(guard.check_memory(85.0).unwrap(), 42.0);
        assert!(guard.check_preflight().is_err());
    }

    #[test]
    fn test_fixed_probe_memory_matches_sample() {
        let probe = FixedProbe::new(33.0, 1.0, 2.0);
        assert_eq!(probe.memory_pct().unwrap(), 33.0);
    }

    #[test]
    fn test_system_probe_reports_percentages() {
        let dir = std::env::temp_dir();
        let probe = SystemProbe::new(&dir).with_cpu_interval(Duration::ZERO);
        if let Ok(sample) = probe.sample() {
            assert!((0.0..=100.0).contains(&sample.memory_pct));
            assert!((0.0..=100.0).contains(&sample.disk_pct));
        }
        assert!((0.0..=100.0).contains(&probe.memory_pct().unwrap()));
    }
}
