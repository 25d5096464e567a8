//! Snapshot diffing.
//!
//! Each cell is classified on its own: a link appears, disappears, changes
//! its parameter, or stays as it is. The iteration domain decides which
//! cells are looked at.

use crate::domain::IterationDomain;
use crate::error::{Result, TopologyError};
use crate::matrix::{is_link, Cell, VisibilityMatrix};

/// The three edge transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Transition {
    /// `old < 0`, `new >= 0`.
    Addition,
    /// `old >= 0`, `new < 0`.
    Removal,
    /// Both present with different values.
    Modification,
}

/// Classify one cell. `None` means no transition.
pub fn classify(old: f64, new: f64) -> Option<Transition> {
    match (is_link(old), is_link(new)) {
        (false, true) => Some(Transition::Addition),
        (true, false) => Some(Transition::Removal),
        (true, true) if old != new => Some(Transition::Modification),
        _ => None,
    }
}

/// Cells grouped by transition, each list in iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transitions {
    pub additions: Vec<Cell>,
    pub removals: Vec<Cell>,
    pub modifications: Vec<Cell>,
}

impl Transitions {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.modifications.is_empty()
    }

    /// Total number of transitions.
    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len() + self.modifications.len()
    }

    fn push(&mut self, transition: Transition, cell: Cell) {
        match transition {
            Transition::Addition => self.additions.push(cell),
            Transition::Removal => self.removals.push(cell),
            Transition::Modification => self.modifications.push(cell),
        }
    }
}

/// Diff two snapshots over `domain`.
///
/// With no previous snapshot every present link in `next` is an addition.
/// Snapshots of different shape are rejected rather than truncated.
pub fn diff(
    previous: Option<&VisibilityMatrix>,
    next: &VisibilityMatrix,
    domain: IterationDomain,
) -> Result<Transitions> {
    let (rows, cols) = next.dims();
    domain.check(rows, cols)?;

    let mut out = Transitions::default();
    match previous {
        Some(prev) => {
            if prev.dims() != next.dims() {
                return Err(TopologyError::DimensionMismatch {
                    previous: prev.dims(),
                    next: next.dims(),
                });
            }
            for cell in domain.cells(rows, cols) {
                if let Some(t) = classify(prev.at(cell), next.at(cell)) {
                    out.push(t, cell);
                }
            }
        }
        None => {
            out.additions = domain
                .cells(rows, cols)
                .filter(|&cell| next.has_link(cell))
                .collect();
        }
    }
    Ok(out)
}
