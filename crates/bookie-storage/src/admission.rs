//! Disk usage admission control
//!
//! A background monitor samples the usage ratio of every ledger directory.
//! Writes are admitted while at least one ledger directory is below the hard
//! threshold; crossing the warn threshold only logs.

use bookie_common::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Check a warn/hard threshold pair
///
/// Both must lie in `(0, 1)` and warn must not exceed hard.
pub fn validate_thresholds(warn: f32, hard: f32) -> Result<()> {
    let in_range = |v: f32| v > 0.0 && v < 1.0;
    if !in_range(warn) || !in_range(hard) || warn > hard {
        return Err(Error::InvalidThresholdConfig { warn, hard });
    }
    Ok(())
}

/// Usage level of a single directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageLevel {
    Normal,
    Warn,
    Full,
}

/// Tracks per-directory usage and decides whether writes are admitted
pub struct AdmissionController {
    warn_threshold: f32,
    hard_threshold: f32,
    usage: RwLock<HashMap<PathBuf, f32>>,
    read_only: AtomicBool,
}

impl AdmissionController {
    /// Create a controller after validating the thresholds
    pub fn new(warn_threshold: f32, hard_threshold: f32) -> Result<Self> {
        validate_thresholds(warn_threshold, hard_threshold)?;
        Ok(Self {
            warn_threshold,
            hard_threshold,
            usage: RwLock::new(HashMap::new()),
            read_only: AtomicBool::new(false),
        })
    }

    /// Classify a usage ratio
    #[must_use]
    pub fn level(&self, usage: f32) -> UsageLevel {
        if usage >= self.hard_threshold {
            UsageLevel::Full
        } else if usage >= self.warn_threshold {
            UsageLevel::Warn
        } else {
            UsageLevel::Normal
        }
    }

    /// Record a new usage sample for `dir`
    pub fn record_usage(&self, dir: &Path, usage: f32) {
        let level = self.level(usage);
        let previous = {
            let mut map = self.usage.write();
            map.insert(dir.to_path_buf(), usage)
        };
        let previous_level = previous.map(|u| self.level(u));

        if previous_level != Some(level) {
            match level {
                UsageLevel::Full => warn!(
                    "Directory {:?} usage {:.3} reached hard threshold {:.3}",
                    dir, usage, self.hard_threshold
                ),
                UsageLevel::Warn => warn!(
                    "Directory {:?} usage {:.3} above warn threshold {:.3}",
                    dir, usage, self.warn_threshold
                ),
                UsageLevel::Normal if previous_level.is_some() => {
                    info!("Directory {:?} usage back to {:.3}", dir, usage);
                }
                UsageLevel::Normal => {}
            }
        }

        let writable = self.is_writable();
        let was_read_only = self.read_only.swap(!writable, Ordering::AcqRel);
        if was_read_only == writable {
            if writable {
                info!("Bookie is writable again");
            } else {
                error!("All ledger directories are full, bookie is read-only");
            }
        }
    }

    /// Whether any ledger directory can take writes
    ///
    /// Before any sample arrives the bookie is writable.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        let map = self.usage.read();
        map.is_empty() || map.values().any(|&u| u < self.hard_threshold)
    }

    /// Whether a specific directory can take writes
    #[must_use]
    pub fn is_dir_writable(&self, dir: &Path) -> bool {
        self.usage
            .read()
            .get(dir)
            .is_none_or(|&u| u < self.hard_threshold)
    }

    /// Fail with `DiskThresholdExceeded` unless writes are admitted
    pub fn check_admission(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(Error::DiskThresholdExceeded)
        }
    }

    /// Whether the last sample left the bookie read-only
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}

/// Source of disk usage ratios
pub trait DiskUsageSampler: Send + Sync {
    /// Fraction of the filesystem holding `dir` that is in use
    fn usage(&self, dir: &Path) -> Result<f32>;
}

/// Samples usage with `statvfs`
#[derive(Clone, Copy, Debug, Default)]
pub struct StatvfsSampler;

impl DiskUsageSampler for StatvfsSampler {
    fn usage(&self, dir: &Path) -> Result<f32> {
        let stat = nix::sys::statvfs::statvfs(dir)
            .map_err(|e| Error::Io(std::io::Error::from(e)))?;
        let total = stat.blocks() as f64;
        if total == 0.0 {
            return Ok(0.0);
        }
        let available = stat.blocks_available() as f64;
        Ok((1.0 - available / total) as f32)
    }
}

/// Background thread feeding samples into an [`AdmissionController`]
pub struct DiskMonitor {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DiskMonitor {
    /// Start sampling `dirs` every `interval`
    ///
    /// One round of samples is taken before this returns so the controller
    /// reflects the disks as soon as the storage is mounted.
    pub fn start(
        controller: Arc<AdmissionController>,
        sampler: Arc<dyn DiskUsageSampler>,
        dirs: Vec<PathBuf>,
        interval: Duration,
    ) -> Result<Self> {
        sample_all(&controller, sampler.as_ref(), &dirs);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("bookie-disk-monitor".to_string())
            .spawn(move || monitor_loop(&controller, sampler.as_ref(), &dirs, interval, &stop_rx))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the monitor thread and wait for it
    pub fn shutdown(&mut self) {
        // Dropping the sender wakes the thread
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Disk monitor thread panicked");
            }
        }
    }
}

impl Drop for DiskMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor_loop(
    controller: &AdmissionController,
    sampler: &dyn DiskUsageSampler,
    dirs: &[PathBuf],
    interval: Duration,
    stop_rx: &Receiver<()>,
) {
    debug!("Disk monitor started for {} directories", dirs.len());
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => sample_all(controller, sampler, dirs),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Disk monitor stopped");
}

fn sample_all(controller: &AdmissionController, sampler: &dyn DiskUsageSampler, dirs: &[PathBuf]) {
    for dir in dirs {
        match sampler.usage(dir) {
            Ok(usage) => controller.record_usage(dir, usage),
            Err(e) => warn!("Failed to sample disk usage of {:?}: {}", dir, e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_samplers::FixedSampler;
    use super::*;

    #[test]
    fn test_validate_thresholds() {
        assert!(validate_thresholds(0.90, 0.95).is_ok());
        assert!(validate_thresholds(0.95, 0.95).is_ok());
        for (warn, hard) in [(0.95, 0.90), (0.5, 1.0), (0.0, 0.5), (0.5, 1.5), (-0.1, 0.9)] {
            assert!(
                matches!(
                    validate_thresholds(warn, hard),
                    Err(Error::InvalidThresholdConfig { .. })
                ),
                "warn={warn} hard={hard}"
            );
        }
    }

    #[test]
    fn test_writable_until_every_dir_full() {
        let controller = AdmissionController::new(0.8, 0.9).unwrap();
        let a = PathBuf::from("/disk/a");
        let b = PathBuf::from("/disk/b");

        assert!(controller.is_writable());
        controller.record_usage(&a, 0.95);
        assert!(!controller.is_writable());
        assert!(!controller.is_dir_writable(&a));
        assert!(controller.is_dir_writable(&b));

        controller.record_usage(&b, 0.85);
        assert!(controller.is_writable());
        controller.check_admission().unwrap();

        controller.record_usage(&b, 0.92);
        assert!(!controller.is_writable());
        assert!(controller.is_read_only());
        assert!(matches!(
            controller.check_admission(),
            Err(Error::DiskThresholdExceeded)
        ));

        controller.record_usage(&a, 0.1);
        assert!(controller.is_writable());
        assert!(!controller.is_read_only());
    }

    #[test]
    fn test_levels() {
        let controller = AdmissionController::new(0.8, 0.9).unwrap();
        assert_eq!(controller.level(0.5), UsageLevel::Normal);
        assert_eq!(controller.level(0.8), UsageLevel::Warn);
        assert_eq!(controller.level(0.9), UsageLevel::Full);
    }

    #[test]
    fn test_monitor_samples_on_start_and_stops() {
        let controller = Arc::new(AdmissionController::new(0.8, 0.9).unwrap());
        let sampler = Arc::new(FixedSampler::new(0.95));
        let dirs = vec![PathBuf::from("/disk/a")];

        let mut monitor = DiskMonitor::start(
            Arc::clone(&controller),
            sampler.clone(),
            dirs,
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(!controller.is_writable());

        sampler.set_all(0.2);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !controller.is_writable() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(controller.is_writable());

        monitor.shutdown();
        monitor.shutdown();
    }

    #[test]
    fn test_statvfs_sampler() {
        let dir = tempfile::tempdir().unwrap();
        let usage = StatvfsSampler.usage(dir.path()).unwrap();
        assert!((0.0..=1.0).contains(&usage));
        assert!(StatvfsSampler.usage(&dir.path().join("missing")).is_err());
    }
}
