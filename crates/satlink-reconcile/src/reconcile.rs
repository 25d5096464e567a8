//! Reconciliation loop.
//!
//! Drives load → diff → apply → scan once per snapshot, in snapshot order,
//! with a fixed pause between snapshots. The last applied matrix is the only
//! state carried between cycles.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use satlink_topology::{diff, TopologyStatus, VisibilityMatrix};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::orchestrator::{ApplySummary, LinkOrchestrator};
use crate::scan::{ScanCoordinator, ScanReport};
use crate::store::{MatrixStore, Snapshot};

/// Loop phase, observable through [`LoopHandle::phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Loading,
    Diffing,
    Applying,
    Scanning,
    /// Halted on a fatal error
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Diffing => "diffing",
            Phase::Applying => "applying",
            Phase::Scanning => "scanning",
            Phase::Failed => "failed",
        })
    }
}

/// The last successfully applied snapshot.
#[derive(Debug, Clone, Default)]
pub struct TopologyState {
    applied: Option<Arc<VisibilityMatrix>>,
    source: Option<PathBuf>,
    cycles: u64,
}

impl TopologyState {
    pub fn applied(&self) -> Option<&Arc<VisibilityMatrix>> {
        self.applied.as_ref()
    }

    /// File the applied matrix came from.
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    /// Number of cycles applied so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn advance(&mut self, snapshot: &Snapshot) {
        self.applied = Some(Arc::clone(&snapshot.matrix));
        self.source = Some(snapshot.source.clone());
        self.cycles += 1;
    }
}

/// What one applied cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub source: PathBuf,
    pub ordinal: Option<u64>,
    pub summary: ApplySummary,
    pub status: TopologyStatus,
    pub scan: Option<ScanReport>,
}

/// Result of one step of the loop.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Applied(Box<CycleReport>),
    /// Snapshot rejected; the previous topology stays in place
    Skipped { source: PathBuf, reason: String },
}

/// Totals of a finished [`ReconciliationLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub applied: usize,
    pub skipped: usize,
    /// Ended by [`LoopHandle::stop`] rather than by running out of snapshots
    pub stopped: bool,
}

/// Control side of a running loop.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    stop: Arc<watch::Sender<bool>>,
    phase: watch::Receiver<Phase>,
}

impl LoopHandle {
    /// Ask the loop to stop. The current cycle finishes first.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }
}

/// Top-level driver.
pub struct ReconciliationLoop {
    store: MatrixStore,
    orchestrator: LinkOrchestrator,
    scanner: Option<ScanCoordinator>,
    interval: Duration,
    state: TopologyState,
    phase: watch::Sender<Phase>,
    stop: watch::Receiver<bool>,
}

impl ReconciliationLoop {
    pub fn new(
        store: MatrixStore,
        orchestrator: LinkOrchestrator,
        scanner: Option<ScanCoordinator>,
        interval: Duration,
    ) -> (Self, LoopHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let handle = LoopHandle {
            stop: Arc::new(stop_tx),
            phase: phase_rx,
        };
        let this = Self {
            store,
            orchestrator,
            scanner,
            interval,
            state: TopologyState::default(),
            phase: phase_tx,
            stop: stop_rx,
        };
        (this, handle)
    }

    pub fn state(&self) -> &TopologyState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    /// Bring the topology in line with `snapshot`.
    ///
    /// Errors leave the state untouched. Link operation failures do not
    /// count as errors: the state advances regardless.
    pub async fn reconcile(&mut self, snapshot: Snapshot) -> Result<CycleReport> {
        self.set_phase(Phase::Diffing);
        let domain = self.orchestrator.domain();
        domain.check(&snapshot.matrix)?;
        let previous = self.state.applied().map(|m| m.as_ref());
        let transitions = diff(previous, &snapshot.matrix, domain.shape)?;
        for cell in &transitions.additions {
            tracing::debug!("+ {}", cell);
        }
        for cell in &transitions.removals {
            tracing::debug!("- {}", cell);
        }
        for cell in &transitions.modifications {
            tracing::debug!("~ {}", cell);
        }

        self.set_phase(Phase::Applying);
        let summary = self
            .orchestrator
            .apply(&transitions, &snapshot.matrix)
            .await?;
        self.state.advance(&snapshot);

        let status = self.orchestrator.domain().status(&snapshot.matrix);
        tracing::info!("Applied {}: {}", snapshot.source.display(), summary);
        tracing::info!("Topology: {}", status);

        let scan = match self.scanner.as_ref().filter(|s| s.config().enabled) {
            Some(scanner) => {
                self.set_phase(Phase::Scanning);
                match scanner.scan(&snapshot.matrix).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        tracing::warn!("Scan skipped: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        self.set_phase(Phase::Idle);
        Ok(CycleReport {
            source: snapshot.source,
            ordinal: snapshot.ordinal,
            summary,
            status,
            scan,
        })
    }

    /// Process the next snapshot.
    ///
    /// `None` when the store is exhausted, `Some(Err)` only for fatal errors.
    pub async fn step(&mut self) -> Option<Result<CycleOutcome>> {
        self.set_phase(Phase::Loading);
        let Some((entry, loaded)) = self.store.next_snapshot().await else {
            self.set_phase(Phase::Idle);
            return None;
        };

        let result = match loaded {
            Ok(snapshot) => self.reconcile(snapshot).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => Some(Ok(CycleOutcome::Applied(Box::new(report)))),
            Err(e) if e.is_fatal() => {
                self.set_phase(Phase::Failed);
                tracing::error!("Fatal error on {}: {}", entry.name(), e);
                Some(Err(e))
            }
            Err(e) => {
                self.set_phase(Phase::Idle);
                tracing::warn!("Skipping {}: {}", entry.name(), e);
                Some(Ok(CycleOutcome::Skipped {
                    source: entry.path,
                    reason: e.to_string(),
                }))
            }
        }
    }

    /// Consume every snapshot, pausing `interval` between them.
    pub async fn run(mut self) -> Result<RunSummary> {
        if self.store.entries().is_empty() {
            let err = Error::NoSnapshots(self.store.dir().to_path_buf());
            self.set_phase(Phase::Failed);
            return Err(err);
        }

        tracing::info!(
            "Reconciling {} snapshot(s) from {:?} every {:?}",
            self.store.remaining(),
            self.store.dir(),
            self.interval
        );

        let mut summary = RunSummary::default();
        loop {
            if *self.stop.borrow() {
                summary.stopped = true;
                break;
            }
            match self.step().await {
                None => break,
                Some(Ok(CycleOutcome::Applied(_))) => summary.applied += 1,
                Some(Ok(CycleOutcome::Skipped { .. })) => summary.skipped += 1,
                Some(Err(e)) => return Err(e),
            }
            if self.store.remaining() == 0 {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop_requested(&mut self.stop) => {
                    summary.stopped = true;
                    break;
                }
            }
        }

        tracing::info!(
            "Reconciliation finished: {} applied, {} skipped{}",
            summary.applied,
            summary.skipped,
            if summary.stopped { " (stopped)" } else { "" }
        );
        Ok(summary)
    }
}

/// Resolves once a stop was requested. Never resolves if every handle is gone.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchConfig, ScanConfig};
    use crate::testing::{Call, FakeRemote, RecordingLinkOps};
    use satlink_topology::{AllocationScheme, DomainDescriptor, TopologyError};
    use std::path::Path;

    struct Harness {
        dir: tempfile::TempDir,
        ops: Arc<RecordingLinkOps>,
        domain: Arc<DomainDescriptor>,
    }

    impl Harness {
        fn new(domain: DomainDescriptor) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                ops: Arc::new(RecordingLinkOps::default()),
                domain: Arc::new(domain),
            }
        }

        fn write(&self, name: &str, body: &str) {
            std::fs::write(self.dir.path().join(name), body).unwrap();
        }

        fn build(&self, scanner: Option<ScanCoordinator>) -> (ReconciliationLoop, LoopHandle) {
            let store = MatrixStore::open(self.dir.path(), "csv").unwrap();
            let orchestrator = LinkOrchestrator::new(
                self.ops.clone(),
                Arc::clone(&self.domain),
                BatchConfig::default(),
            );
            ReconciliationLoop::new(store, orchestrator, scanner, Duration::from_secs(20))
        }
    }

    fn applied(outcome: Option<Result<CycleOutcome>>) -> CycleReport {
        match outcome {
            Some(Ok(CycleOutcome::Applied(report))) => *report,
            other => panic!("expected applied cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_snapshot_twice_makes_no_calls() {
        let h = Harness::new(DomainDescriptor::constellation_mesh(2, 20));
        h.write("m1.csv", "-1,5\n5,-1\n");
        h.write("m2.csv", "-1,5\n5,-1\n");
        let (mut lp, _handle) = h.build(None);

        let first = applied(lp.step().await);
        assert_eq!(first.summary.additions.total, 1);
        assert_eq!(h.ops.calls().len(), 2);
        h.ops.clear();

        let second = applied(lp.step().await);
        assert_eq!(second.summary.total(), 0);
        assert!(h.ops.calls().is_empty());
        assert_eq!(second.status.active_links, 1);
        assert_eq!(lp.state().cycles(), 2);
        assert!(lp.step().await.is_none());
    }

    #[tokio::test]
    async fn bad_snapshots_are_skipped_and_state_is_kept() {
        let h = Harness::new(DomainDescriptor::relay_access(1, 3, 0));
        h.write("s1.csv", "-1,3,-1\n");
        h.write("s2.csv", "-1,x,-1\n");
        h.write("s3.csv", "-1,3\n");
        h.write("s4.csv", "-1,7,-1\n");
        let (mut lp, handle) = h.build(None);

        applied(lp.step().await);
        h.ops.clear();

        assert!(matches!(lp.step().await, Some(Ok(CycleOutcome::Skipped { .. }))));
        assert_eq!(handle.phase(), Phase::Idle);
        // Narrower snapshot is still valid for the domain but mismatches the last one
        match lp.step().await {
            Some(Ok(CycleOutcome::Skipped { reason, .. })) => {
                assert!(reason.contains("dimension mismatch"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(lp.state().source().unwrap().ends_with("s1.csv"));
        assert!(h.ops.calls().is_empty());

        // Diffed against s1, so only the parameter changes
        let report = applied(lp.step().await);
        assert_eq!(report.summary.modifications.total, 1);
        assert_eq!(
            h.ops.calls(),
            vec![Call::SetParams {
                link: "TSN1<->YG2".into(),
                delay_ms: 7.0
            }]
        );
    }

    #[tokio::test]
    async fn oversized_snapshot_is_an_input_error() {
        let h = Harness::new(DomainDescriptor::relay_access(1, 1, 0));
        h.write("s1.csv", "1,1\n");
        let (mut lp, _handle) = h.build(None);
        match lp.step().await {
            Some(Ok(CycleOutcome::Skipped { reason, .. })) => {
                assert_eq!(
                    reason,
                    Error::from(TopologyError::UnknownNode { axis: "column", index: 1 }).to_string()
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn collision_halts_the_loop() {
        let h = Harness::new(
            DomainDescriptor::constellation_mesh(6, 20).with_scheme(AllocationScheme::Product),
        );
        let mut rows = vec![vec!["-1"; 6]; 6];
        rows[1][5] = "1";
        rows[2][3] = "1";
        let body: String = rows.iter().map(|r| r.join(",") + "\n").collect();
        h.write("c1.csv", &body);
        h.write("c2.csv", &body);
        let (lp, handle) = h.build(None);

        let err = lp.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(handle.phase(), Phase::Failed);
        assert!(h.ops.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_paces_snapshots_by_interval() {
        let h = Harness::new(DomainDescriptor::constellation_mesh(2, 20));
        h.write("m1.csv", "-1,-1\n-1,-1\n");
        h.write("m2.csv", "-1,300\n300,-1\n");
        h.write("m3.csv", "-1,-1\n-1,-1\n");
        let (lp, _handle) = h.build(None);

        let start = tokio::time::Instant::now();
        let summary = lp.run().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                applied: 3,
                skipped: 0,
                stopped: false
            }
        );
        // Two pauses, none after the last snapshot
        assert!(start.elapsed() >= Duration::from_secs(40));
        assert!(start.elapsed() < Duration::from_secs(60));

        let kinds: Vec<_> = h.ops.calls().iter().map(Call::kind).collect();
        assert_eq!(kinds, vec!["create", "set", "delete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop_during_the_pause() {
        let h = Harness::new(DomainDescriptor::constellation_mesh(2, 20));
        for i in 1..=3 {
            h.write(&format!("m{i}.csv"), "-1,300\n300,-1\n");
        }
        let (lp, handle) = h.build(None);

        let task = tokio::spawn(lp.run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.stop();
        let summary = task.await.unwrap().unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.applied, 1);
    }

    #[tokio::test]
    async fn empty_directory_is_fatal() {
        let h = Harness::new(DomainDescriptor::constellation_mesh(2, 20));
        let (lp, _handle) = h.build(None);
        let err = lp.run().await.unwrap_err();
        assert!(matches!(err, Error::NoSnapshots(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn scan_follows_apply() {
        let h = Harness::new(DomainDescriptor::relay_access(2, 1, 0));
        h.write("a1.csv", "4\n-1\n");
        let remote = Arc::new(FakeRemote::default());
        let root = tempfile::tempdir().unwrap();
        let scanner = ScanCoordinator::new(
            remote.clone(),
            Arc::clone(&h.domain),
            ScanConfig {
                log_dir: root.path().join("logs"),
                work_dir: root.path().join("work"),
                ..ScanConfig::default()
            },
        );
        let (mut lp, _handle) = h.build(Some(scanner));

        let report = applied(lp.step().await);
        let scan = report.scan.unwrap();
        assert_eq!(scan.total(), 2);
        assert_eq!(scan.succeeded(), 2);
        assert_eq!(remote.discoveries().len(), 1);
        assert!(Path::new(&root.path().join("logs")).is_dir());
    }
}
