//! Neighbor scan coordination.
//!
//! After a cycle is applied every row node gets one task that asks the node
//! to discover its visible neighbors and forwards the resulting artifacts to
//! their collectors. Tasks are independent: each has its own deadline, its
//! own log file and its own scratch directory, and a failure or panic in one
//! is recorded against that node only. The coordinator waits for every task
//! before returning.

use std::fmt::Display;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use satlink_topology::{DomainDescriptor, ManagementPlan, Neighbor, NodeRef, VisibilityMatrix};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::collector::CollectorMap;
use crate::config::ScanConfig;
use crate::error::Result;
use crate::ops::{DiscoveryRequest, RemoteExec};

/// How one node's task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanOutcome {
    /// Nothing visible, no remote work done.
    NoNeighbors,
    Completed {
        artifacts: usize,
        transferred: usize,
    },
    Failed(String),
    TimedOut,
    Panicked(String),
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            ScanOutcome::NoNeighbors => true,
            ScanOutcome::Completed {
                artifacts,
                transferred,
            } => artifacts == transferred,
            _ => false,
        }
    }
}

impl std::fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanOutcome::NoNeighbors => write!(f, "no visible neighbors"),
            ScanOutcome::Completed {
                artifacts,
                transferred,
            } => write!(f, "completed, {}/{} artifacts forwarded", transferred, artifacts),
            ScanOutcome::Failed(e) => write!(f, "failed: {}", e),
            ScanOutcome::TimedOut => write!(f, "timed out"),
            ScanOutcome::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

/// Result of one node's task.
#[derive(Debug, Clone, Serialize)]
pub struct NodeScan {
    pub node: NodeRef,
    pub neighbors: usize,
    pub outcome: ScanOutcome,
    /// Task log file, when one was written
    pub log: Option<PathBuf>,
}

/// Results of one scan, ordered by row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub nodes: Vec<NodeScan>,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.nodes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.nodes.iter().filter(|n| n.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn get(&self, name: &str) -> Option<&NodeScan> {
        self.nodes.iter().find(|n| n.node.name() == name)
    }
}

/// State shared by every task of one scan.
struct TaskContext {
    remote: Arc<dyn RemoteExec>,
    collectors: CollectorMap,
    management: ManagementPlan,
    timeout: Duration,
    log_dir: PathBuf,
    work_root: PathBuf,
}

struct Job {
    node: NodeRef,
    address: std::net::Ipv4Addr,
    neighbors: Vec<Neighbor>,
}

/// Runs one discovery task per row node.
pub struct ScanCoordinator {
    remote: Arc<dyn RemoteExec>,
    domain: Arc<DomainDescriptor>,
    config: ScanConfig,
}

impl ScanCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteExec>,
        domain: Arc<DomainDescriptor>,
        config: ScanConfig,
    ) -> Self {
        Self {
            remote,
            domain,
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan every row node of `matrix` and wait for all tasks.
    ///
    /// Fails only if the matrix does not fit the domain. Task failures are
    /// reported in the [`ScanReport`].
    pub async fn scan(&self, matrix: &VisibilityMatrix) -> Result<ScanReport> {
        self.domain.check(matrix)?;
        let jobs = (0..matrix.rows())
            .map(|row| {
                let node = self.domain.row_node(row)?;
                Ok(Job {
                    node,
                    address: self.domain.management.address(&node),
                    neighbors: self.domain.neighbors(matrix, row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let ctx = Arc::new(TaskContext {
            remote: Arc::clone(&self.remote),
            collectors: self.config.collectors.clone(),
            management: self.domain.management,
            timeout: self.config.timeout,
            log_dir: self.config.log_dir.clone(),
            work_root: self.config.work_dir.clone(),
        });
        let slots = self
            .config
            .max_parallel
            .filter(|&n| n < jobs.len())
            .map(|n| Arc::new(Semaphore::new(n)));

        tracing::info!(
            "Scanning {} node(s), {} slot(s), timeout {:?}",
            jobs.len(),
            slots.as_ref().map_or(jobs.len(), |s| s.available_permits()),
            self.config.timeout
        );

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut set = JoinSet::new();
        for job in jobs {
            let ctx = Arc::clone(&ctx);
            let slots = slots.clone();
            let stamp = stamp.clone();
            set.spawn(async move {
                let _permit = match slots {
                    Some(s) => s.acquire_owned().await.ok(),
                    None => None,
                };
                run_task(&ctx, job, &stamp).await
            });
        }

        let mut report = ScanReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(scan) => report.nodes.push(scan),
                Err(e) => tracing::error!("Scan task aborted: {}", e),
            }
        }
        report.nodes.sort_by_key(|n| n.node.index);

        tracing::info!(
            "Scan finished: {}/{} node(s) ok",
            report.succeeded(),
            report.total()
        );
        Ok(report)
    }
}

/// Run one task with panic isolation.
async fn run_task(ctx: &TaskContext, job: Job, stamp: &str) -> NodeScan {
    let node = job.node;
    let neighbors = job.neighbors.len();
    let log = (neighbors > 0)
        .then(|| ctx.log_dir.join(format!("{}_scan_{}.log", node.name(), stamp)));

    let outcome = AssertUnwindSafe(scan_node(ctx, job, log.as_deref(), stamp))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| ScanOutcome::Panicked(panic_message(panic.as_ref())));

    match &outcome {
        o if o.is_success() => tracing::info!("{}: {}", node, o),
        ScanOutcome::Panicked(_) => tracing::error!("{}: {}", node, outcome),
        o => tracing::warn!("{}: {}", node, o),
    }

    NodeScan {
        node,
        neighbors,
        outcome,
        log,
    }
}

async fn scan_node(ctx: &TaskContext, job: Job, log: Option<&Path>, stamp: &str) -> ScanOutcome {
    let Some(log) = log else {
        return ScanOutcome::NoNeighbors;
    };
    let mut log = TaskLog::create(log).await;

    let work_name = format!("{}-{}", job.node.name(), stamp);
    let work = match WorkDir::create(&ctx.work_root, &work_name).await {
        Ok(work) => work,
        Err(e) => {
            log.line(format_args!("cannot create work dir: {}", e));
            return ScanOutcome::Failed(format!("work dir: {}", e));
        }
    };

    let names: Vec<String> = job.neighbors.iter().map(|n| n.node.to_string()).collect();
    log.line(format_args!(
        "{} ({}) scanning {} neighbor(s): {}",
        job.node,
        job.address,
        names.len(),
        names.join(", ")
    ));

    let request = DiscoveryRequest {
        node: job.node,
        address: job.address,
        neighbors: job.neighbors,
        timeout: ctx.timeout,
        work_dir: work.path().to_path_buf(),
    };

    let deadline = tokio::time::timeout(ctx.timeout, discover_and_forward(ctx, &request, &mut log));
    let outcome = match deadline.await {
        Err(_) => ScanOutcome::TimedOut,
        Ok(Err(e)) => ScanOutcome::Failed(format!("{:#}", e)),
        Ok(Ok((artifacts, transferred))) => ScanOutcome::Completed {
            artifacts,
            transferred,
        },
    };
    log.line(&outcome);
    outcome
}

async fn discover_and_forward(
    ctx: &TaskContext,
    request: &DiscoveryRequest,
    log: &mut TaskLog,
) -> anyhow::Result<(usize, usize)> {
    let artifacts = ctx.remote.run_discovery(request).await?;
    log.line(format_args!("discovery returned {} artifact(s)", artifacts.len()));

    let mut transferred = 0;
    for artifact in &artifacts {
        let collector = ctx
            .management
            .number_of(artifact.source)
            .map_or(ctx.collectors.fallback(), |n| ctx.collectors.route(n));
        match ctx.remote.transfer_artifact(artifact, collector).await {
            Ok(true) => {
                transferred += 1;
                log.line(format_args!("{} -> {}", artifact.name, collector));
            }
            Ok(false) => log.line(format_args!("{} -> {} failed", artifact.name, collector)),
            Err(e) => log.line(format_args!("{} -> {} failed: {:#}", artifact.name, collector, e)),
        }
    }
    Ok((artifacts.len(), transferred))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Append-only, timestamped per-task log file.
///
/// Logging must never fail a task, so write errors only reach `tracing`.
struct TaskLog {
    file: Option<std::fs::File>,
}

impl TaskLog {
    async fn create(path: &Path) -> Self {
        match Self::open(path).await {
            Ok(file) => Self { file: Some(file) },
            Err(e) => {
                tracing::warn!("Cannot open scan log {:?}: {}", path, e);
                Self { file: None }
            }
        }
    }

    async fn open(path: &Path) -> std::io::Result<std::fs::File> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::File::create(path).await?.into_std().await)
    }

    fn line(&mut self, msg: impl Display) {
        if let Some(file) = self.file.as_mut() {
            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            if let Err(e) = writeln!(file, "[{}] {}", now, msg) {
                tracing::warn!("Scan log write failed: {}", e);
                self.file = None;
            }
        }
    }
}

/// Scratch directory removed on drop, including during unwinding and when
/// the owning future is cancelled.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    async fn create(root: &Path, name: &str) -> std::io::Result<Self> {
        let path = root.join(name);
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::debug!("Work dir {:?} not removed: {}", self.path, e);
        }
    }
}
