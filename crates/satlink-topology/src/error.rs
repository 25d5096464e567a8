//! Error types for satlink-topology.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::address::PairKey;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Malformed or incompatible matrix input.
///
/// All of these are recoverable at the cycle level: the offending snapshot is
/// skipped and the previously applied topology stays in place.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    /// The grid contained no rows or no columns.
    #[error("matrix is empty")]
    EmptyMatrix,

    /// A row had a different number of cells than the first row.
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// A cell could not be parsed as a finite number.
    #[error("invalid cell at row {row}, column {col}: {value:?}")]
    InvalidCell {
        row: usize,
        col: usize,
        value: String,
    },

    /// Two consecutive snapshots disagree on shape.
    #[error("dimension mismatch: previous {previous:?}, next {next:?}")]
    DimensionMismatch {
        previous: (usize, usize),
        next: (usize, usize),
    },

    /// Upper-triangle iteration only makes sense for a square peer mesh.
    #[error("upper-triangle iteration requires a square matrix, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    /// A matrix index has no node in the descriptor's axis.
    #[error("index {index} is outside the {axis} axis")]
    UnknownNode { axis: &'static str, index: usize },
}

/// Address allocation faults.
///
/// These are design-level bugs, not input errors: callers must treat them as
/// fatal and never retry or overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Two distinct pairs resolved to the same point-to-point subnet.
    #[error("address collision: {pair} and {existing} both map to subnet {subnet}")]
    Collision {
        pair: PairKey,
        existing: PairKey,
        subnet: Ipv4Addr,
    },

    /// The pair's slot lies beyond the configured address partition.
    #[error("address space exhausted: {pair} needs slot {slot}, capacity is {capacity}")]
    Exhausted {
        pair: PairKey,
        slot: u64,
        capacity: u64,
    },

    /// An ordinal was zero or above the configured node ceiling.
    #[error("pair {pair} is outside the supported node range 1..={ceiling}")]
    OutOfRange { pair: PairKey, ceiling: u32 },

    /// A node cannot be linked to itself.
    #[error("self pair {0} cannot be allocated")]
    SelfPair(PairKey),
}
