//! Link orchestration.
//!
//! Turns a diff into substrate calls. Work is planned first (endpoints
//! resolved, addresses allocated) so input and allocation errors surface
//! before anything is touched. Execution then runs removals, additions and
//! modifications in that order, each in fixed-size batches separated by a
//! fixed pause. Individual failures are counted, never retried, and never
//! stop the remaining work.

use std::sync::Arc;

use satlink_topology::{
    AddressAllocator, Cell, DomainDescriptor, LinkAddrs, Transitions, VisibilityMatrix,
};
use serde::Serialize;

use crate::config::BatchConfig;
use crate::error::Result;
use crate::ops::{LinkEnd, LinkOps, LinkRef};

/// Kind of link operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Remove,
    Add,
    Modify,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Remove => "remove",
            Action::Add => "add",
            Action::Modify => "modify",
        })
    }
}

/// Success counters for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub action: Action,
    pub succeeded: usize,
    pub total: usize,
    pub batches: usize,
}

impl BatchOutcome {
    fn empty(action: Action) -> Self {
        Self {
            action,
            succeeded: 0,
            total: 0,
            batches: 0,
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

impl std::fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.action, self.succeeded, self.total)
    }
}

/// Per-kind outcome of one `apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub removals: BatchOutcome,
    pub additions: BatchOutcome,
    pub modifications: BatchOutcome,
}

impl ApplySummary {
    pub fn succeeded(&self) -> usize {
        self.removals.succeeded + self.additions.succeeded + self.modifications.succeeded
    }

    pub fn total(&self) -> usize {
        self.removals.total + self.additions.total + self.modifications.total
    }
}

impl std::fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {} ({}/{} ok)",
            self.removals,
            self.additions,
            self.modifications,
            self.succeeded(),
            self.total()
        )
    }
}

/// One resolved operation.
#[derive(Debug, Clone)]
enum Op {
    Delete(LinkRef),
    Create {
        link: LinkRef,
        addrs: LinkAddrs,
        delay_ms: f64,
    },
    Modify {
        link: LinkRef,
        delay_ms: f64,
    },
}

impl Op {
    fn link(&self) -> &LinkRef {
        match self {
            Op::Delete(link) => link,
            Op::Create { link, .. } => link,
            Op::Modify { link, .. } => link,
        }
    }
}

#[derive(Debug, Default)]
struct Plan {
    removals: Vec<Op>,
    additions: Vec<Op>,
    modifications: Vec<Op>,
}

/// Applies transitions through a [`LinkOps`] substrate.
pub struct LinkOrchestrator {
    ops: Arc<dyn LinkOps>,
    domain: Arc<DomainDescriptor>,
    allocator: Arc<AddressAllocator>,
    batch: BatchConfig,
}

impl LinkOrchestrator {
    /// Create an orchestrator with a fresh allocator over the domain's
    /// link partition.
    pub fn new(ops: Arc<dyn LinkOps>, domain: Arc<DomainDescriptor>, batch: BatchConfig) -> Self {
        let allocator = Arc::new(AddressAllocator::new(
            domain.link_space.clone(),
            domain.symmetric,
        ));
        Self::with_allocator(ops, domain, allocator, batch)
    }

    /// Create an orchestrator sharing an existing allocator.
    pub fn with_allocator(
        ops: Arc<dyn LinkOps>,
        domain: Arc<DomainDescriptor>,
        allocator: Arc<AddressAllocator>,
        batch: BatchConfig,
    ) -> Self {
        Self {
            ops,
            domain,
            allocator,
            batch: BatchConfig {
                size: batch.size.max(1),
                ..batch
            },
        }
    }

    pub fn domain(&self) -> &DomainDescriptor {
        &self.domain
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    /// Apply one diff. `matrix` is the snapshot the diff leads to.
    ///
    /// Returns an error only when planning fails: an unknown node (input
    /// error) or an allocation fault (fatal). Once execution starts every
    /// operation is attempted.
    pub async fn apply(
        &self,
        transitions: &Transitions,
        matrix: &VisibilityMatrix,
    ) -> Result<ApplySummary> {
        let plan = self.plan(transitions, matrix)?;
        tracing::info!(
            "Applying {} removal(s), {} addition(s), {} modification(s)",
            plan.removals.len(),
            plan.additions.len(),
            plan.modifications.len()
        );

        let removals = self.run_batches(Action::Remove, &plan.removals).await;
        let additions = self.run_batches(Action::Add, &plan.additions).await;
        let modifications = self.run_batches(Action::Modify, &plan.modifications).await;

        Ok(ApplySummary {
            removals,
            additions,
            modifications,
        })
    }

    /// Delete every link present in `matrix`.
    pub async fn teardown(&self, matrix: &VisibilityMatrix) -> Result<BatchOutcome> {
        self.domain.check(matrix)?;
        let (rows, cols) = matrix.dims();
        let ops = self
            .domain
            .shape
            .cells(rows, cols)
            .filter(|&cell| matrix.has_link(cell))
            .map(|cell| Ok(Op::Delete(self.link_ref(cell)?)))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("Tearing down {} link(s)", ops.len());
        Ok(self.run_batches(Action::Remove, &ops).await)
    }

    fn plan(&self, transitions: &Transitions, matrix: &VisibilityMatrix) -> Result<Plan> {
        let mut plan = Plan::default();

        for &cell in &transitions.removals {
            plan.removals.push(Op::Delete(self.link_ref(cell)?));
        }
        for &cell in &transitions.additions {
            let link = self.link_ref(cell)?;
            let (a, b) = DomainDescriptor::pair_ordinals(cell);
            let addrs = self.allocator.allocate(a, b)?;
            plan.additions.push(Op::Create {
                link,
                addrs,
                delay_ms: self.domain.delay_ms(matrix.at(cell)),
            });
        }
        for &cell in &transitions.modifications {
            plan.modifications.push(Op::Modify {
                link: self.link_ref(cell)?,
                delay_ms: self.domain.delay_ms(matrix.at(cell)),
            });
        }
        Ok(plan)
    }

    fn link_ref(&self, cell: Cell) -> Result<LinkRef> {
        let (a, b) = self.domain.endpoints(cell)?;
        let (if_a, if_b) = self.domain.interface_names(&a, &b);
        Ok(LinkRef {
            a: LinkEnd {
                node: a,
                interface: if_a,
            },
            b: LinkEnd {
                node: b,
                interface: if_b,
            },
        })
    }

    async fn run_batches(&self, action: Action, ops: &[Op]) -> BatchOutcome {
        let mut outcome = BatchOutcome::empty(action);
        outcome.total = ops.len();
        let count = ops.len().div_ceil(self.batch.size);

        for (index, chunk) in ops.chunks(self.batch.size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch.pause).await;
            }
            let mut ok = 0;
            for op in chunk {
                if self.perform(action, op).await {
                    ok += 1;
                }
            }
            outcome.succeeded += ok;
            outcome.batches += 1;
            tracing::info!(
                "{} batch {}/{}: {}/{} succeeded",
                action,
                index + 1,
                count,
                ok,
                chunk.len()
            );
        }
        outcome
    }

    async fn perform(&self, action: Action, op: &Op) -> bool {
        let link = op.link();
        let result = match op {
            Op::Delete(link) => self.ops.delete_link(link).await,
            Op::Create {
                link,
                addrs,
                delay_ms,
            } => match self.ops.create_link(link, addrs).await {
                Ok(true) => self.ops.set_link_params(link, *delay_ms).await,
                other => other,
            },
            Op::Modify { link, delay_ms } => self.ops.set_link_params(link, *delay_ms).await,
        };

        match result {
            Ok(true) => {
                tracing::debug!("{} {} ok", action, link);
                true
            }
            Ok(false) => {
                tracing::warn!("{} {} failed", action, link);
                false
            }
            Err(e) => {
                tracing::warn!("{} {} failed: {:#}", action, link, e);
                false
            }
        }
    }
}
