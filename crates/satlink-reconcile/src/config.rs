//! Reconciliation configuration.
//!
//! Defaults match the reference deployment. `from_env` overlays `SATLINK_*`
//! variables; the CLI overlays its flags on top of that.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::collector::CollectorMap;
use crate::error::{Error, Result};
use crate::store::MatrixFilter;

/// Throttle for link operations of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Operations per batch
    pub size: usize,
    /// Sleep between consecutive batches
    pub pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 10,
            pause: Duration::from_millis(500),
        }
    }
}

/// Neighbor scan settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Run a scan after each applied cycle
    pub enabled: bool,
    /// Hard deadline for one node's task
    pub timeout: Duration,
    /// Directory for per-task log files
    pub log_dir: PathBuf,
    /// Parent of per-task transient work directories
    pub work_dir: PathBuf,
    /// Cap on concurrently running tasks (`None` = one slot per node)
    pub max_parallel: Option<usize>,
    /// Artifact fan-in targets
    pub collectors: CollectorMap,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(300),
            log_dir: PathBuf::from("scan_logs"),
            work_dir: std::env::temp_dir().join("satlink-scan"),
            max_parallel: None,
            collectors: CollectorMap::default(),
        }
    }
}

/// Configuration for a reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Directory holding the snapshot files
    pub input_dir: PathBuf,
    /// Snapshot file extension (without the dot)
    pub extension: String,
    /// Field delimiter inside snapshot files
    pub delimiter: char,
    /// Pause between consecutive snapshots
    pub interval: Duration,
    pub batch: BatchConfig,
    pub scan: ScanConfig,
    /// Transform applied to each snapshot after parsing
    pub filter: MatrixFilter,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./snapshots"),
            extension: "csv".to_string(),
            delimiter: ',',
            interval: Duration::from_secs(20),
            batch: BatchConfig::default(),
            scan: ScanConfig::default(),
            filter: MatrixFilter::None,
        }
    }
}

impl ReconcileConfig {
    /// Create config from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("SATLINK_INPUT_DIR") {
            config.input_dir = PathBuf::from(dir);
        }
        if let Some(ext) = lookup("SATLINK_EXTENSION") {
            config.extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(secs) = parsed::<u64>(&lookup, "SATLINK_INTERVAL_SECS")? {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(size) = parsed::<usize>(&lookup, "SATLINK_BATCH_SIZE")? {
            config.batch.size = size;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "SATLINK_BATCH_PAUSE_MS")? {
            config.batch.pause = Duration::from_millis(ms);
        }
        if let Some(enabled) = parsed::<bool>(&lookup, "SATLINK_SCAN")? {
            config.scan.enabled = enabled;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "SATLINK_SCAN_TIMEOUT_SECS")? {
            config.scan.timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup("SATLINK_SCAN_LOG_DIR") {
            config.scan.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SATLINK_SCAN_WORK_DIR") {
            config.scan.work_dir = PathBuf::from(dir);
        }
        if let Some(n) = parsed::<usize>(&lookup, "SATLINK_SCAN_PARALLEL")? {
            config.scan.max_parallel = Some(n);
        }
        if let Some(map) = parsed::<CollectorMap>(&lookup, "SATLINK_COLLECTORS")? {
            config.scan.collectors = map;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch.size == 0 {
            return Err(Error::Config("batch size must be at least 1".into()));
        }
        if self.scan.max_parallel == Some(0) {
            return Err(Error::Config("scan parallelism must be at least 1".into()));
        }
        if self.scan.timeout.is_zero() {
            return Err(Error::Config("scan timeout must be positive".into()));
        }
        if self.extension.is_empty() {
            return Err(Error::Config("snapshot extension must not be empty".into()));
        }
        Ok(())
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
    }
}
