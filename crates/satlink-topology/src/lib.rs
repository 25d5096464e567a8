//! Satlink Topology
//!
//! Pure data model for reconciling an emulated satellite link topology
//! against a stream of visibility snapshots.
//!
//! # Model
//!
//! A [`VisibilityMatrix`] says which node pairs can see each other at one
//! instant. A [`DomainDescriptor`] says how to read it: which cells count
//! (upper triangle of a square mesh or the full rectangle of a bipartite
//! relation), which node each index stands for, and which address partition
//! links draw from.
//!
//! [`diff`] turns two consecutive snapshots into [`Transitions`], and the
//! [`AddressAllocator`] hands every link a stable, collision-checked /30.
//!
//! Nothing here performs I/O. Applying transitions to real interfaces is the
//! job of `satlink-reconcile`.

mod address;
mod diff;
mod domain;
mod error;
mod matrix;

pub use address::{
    AddressAllocator, AddressSpace, AllocationScheme, LinkAddrs, PairKey, LINK_PREFIX_LEN,
    SUBNETS_PER_SEGMENT, SUBNET_STRIDE,
};
pub use diff::{classify, diff, Transition, Transitions};
pub use domain::{
    Axis, DelayScale, DomainDescriptor, DomainTable, InterfaceNaming, IterationDomain,
    ManagementPlan, Neighbor, NodeClass, NodeGroup, NodeRef, TopologyStatus, MESH_DELAY_DIVISOR,
};
pub use error::{AddressError, Result, TopologyError};
pub use matrix::{is_link, Cell, VisibilityMatrix, NO_LINK};
