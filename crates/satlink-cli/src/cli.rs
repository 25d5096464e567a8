//! Command line arguments.
//!
//! Reconciliation settings start from `SATLINK_*` environment variables
//! (see [`ReconcileConfig::from_env`]); flags given here override them.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use satlink_reconcile::{CollectorMap, MatrixFilter, ReconcileConfig};
use satlink_substrate::ContainerNaming;
use satlink_topology::{AllocationScheme, DomainDescriptor, VisibilityMatrix};

#[derive(Parser, Debug)]
#[command(name = "satlink")]
#[command(
    about = "Reconcile an emulated satellite link topology against visibility snapshots",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Node pairing the snapshots describe
    #[arg(long, global = true, value_enum, env = "SATLINK_DOMAIN", default_value = "access")]
    pub domain: DomainKind,

    /// Number of relay nodes (positions the mesh in the global numbering)
    #[arg(long, global = true, env = "SATLINK_RELAYS", default_value_t = 8)]
    pub relays: usize,

    /// Number of sensing columns that precede constellation columns
    #[arg(long, global = true, env = "SATLINK_SENSING", default_value_t = 12)]
    pub sensing: usize,

    /// Link subnet allocation scheme
    #[arg(long, global = true, value_enum, env = "SATLINK_ALLOCATION", default_value = "pairing")]
    pub allocation: Allocation,

    /// Keep only the nearest relay per column
    #[arg(long, global = true, env = "SATLINK_NEAREST_RELAY")]
    pub nearest_relay: bool,

    /// Field delimiter inside snapshot files
    #[arg(long, global = true)]
    pub delimiter: Option<char>,

    /// Links per batch
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Pause between batches in milliseconds
    #[arg(long, global = true)]
    pub batch_pause_ms: Option<u64>,

    /// Per-node discovery deadline in seconds
    #[arg(long, global = true)]
    pub scan_timeout: Option<u64>,

    /// Skip discovery after each applied snapshot
    #[arg(long, global = true)]
    pub no_scan: bool,

    /// Maximum concurrent discovery tasks
    #[arg(long, global = true)]
    pub scan_parallel: Option<usize>,

    /// Collector routing, e.g. `1-8=10.0.203.2,9-20=10.0.201.2,*=10.0.202.2`
    #[arg(long, global = true)]
    pub collectors: Option<String>,

    /// Log operations instead of running them
    #[arg(long, global = true, env = "SATLINK_DRY_RUN")]
    pub dry_run: bool,

    /// Run interface commands through sudo
    #[arg(long, global = true, env = "SATLINK_SUDO")]
    pub sudo: bool,

    /// Container name prefix for relay nodes
    #[arg(long, global = true, env = "SATLINK_RELAY_PREFIX")]
    pub relay_prefix: Option<String>,

    /// Container name prefix for sensing nodes
    #[arg(long, global = true, env = "SATLINK_SENSING_PREFIX")]
    pub sensing_prefix: Option<String>,

    /// Container name prefix for constellation nodes
    #[arg(long, global = true, env = "SATLINK_CONSTELLATION_PREFIX")]
    pub constellation_prefix: Option<String>,

    /// Log level
    #[arg(long, global = true, env = "SATLINK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true, env = "SATLINK_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Reconcile every snapshot in the input directory, in order
    Run {
        /// Directory holding snapshot files
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Snapshot file extension
        #[arg(long)]
        extension: Option<String>,

        /// Seconds between snapshots
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run one discovery round for a snapshot and print the report
    Scan {
        #[arg(long)]
        matrix: PathBuf,
    },
    /// Remove every link present in a snapshot
    Teardown {
        #[arg(long)]
        matrix: PathBuf,
    },
    /// Write per-node visible neighbor tables for a snapshot as JSON
    DomainTables {
        #[arg(long)]
        matrix: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print link counts for a snapshot
    Status {
        #[arg(long)]
        matrix: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    /// Square constellation peer mesh
    Mesh,
    /// Relays by (sensing + constellation)
    Access,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Pairing,
    Product,
}

impl From<Allocation> for AllocationScheme {
    fn from(a: Allocation) -> Self {
        match a {
            Allocation::Pairing => AllocationScheme::Pairing,
            Allocation::Product => AllocationScheme::Product,
        }
    }
}

impl Cli {
    /// Environment config with command line overrides applied.
    pub fn reconcile_config(&self) -> satlink_reconcile::Result<ReconcileConfig> {
        let mut config = ReconcileConfig::from_env()?;
        self.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ReconcileConfig) -> satlink_reconcile::Result<()> {
        if let Command::Run {
            input_dir,
            extension,
            interval,
        } = &self.command
        {
            if let Some(dir) = input_dir {
                config.input_dir = dir.clone();
            }
            if let Some(ext) = extension {
                config.extension = ext.trim_start_matches('.').to_string();
            }
            if let Some(secs) = interval {
                config.interval = Duration::from_secs(*secs);
            }
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if self.nearest_relay {
            config.filter = MatrixFilter::NearestPerColumn;
        }
        if let Some(size) = self.batch_size {
            config.batch.size = size;
        }
        if let Some(ms) = self.batch_pause_ms {
            config.batch.pause = Duration::from_millis(ms);
        }
        if let Some(secs) = self.scan_timeout {
            config.scan.timeout = Duration::from_secs(secs);
        }
        if self.no_scan {
            config.scan.enabled = false;
        }
        if let Some(n) = self.scan_parallel {
            config.scan.max_parallel = Some(n);
        }
        if let Some(map) = &self.collectors {
            config.scan.collectors = map.parse::<CollectorMap>()?;
        }
        Ok(())
    }

    /// Descriptor sized to fit `matrix`.
    ///
    /// Mesh snapshots are square over constellation nodes. Access snapshots
    /// have one row per relay and `sensing` leading columns.
    pub fn descriptor(&self, matrix: &VisibilityMatrix) -> DomainDescriptor {
        let descriptor = match self.domain {
            DomainKind::Mesh => {
                let offset = (self.relays + self.sensing) as u32;
                DomainDescriptor::constellation_mesh(matrix.cols(), offset)
            }
            DomainKind::Access => DomainDescriptor::relay_access(
                matrix.rows(),
                self.sensing,
                matrix.cols().saturating_sub(self.sensing),
            ),
        };
        descriptor.with_scheme(self.allocation.into())
    }

    pub fn container_naming(&self) -> ContainerNaming {
        let mut naming = ContainerNaming::default();
        if let Some(prefix) = &self.relay_prefix {
            naming.relay = prefix.clone();
        }
        if let Some(prefix) = &self.sensing_prefix {
            naming.sensing = prefix.clone();
        }
        if let Some(prefix) = &self.constellation_prefix {
            naming.constellation = prefix.clone();
        }
        naming
    }
}
