//! Substrate boundaries.
//!
//! The reconciler never builds command strings. Everything that touches real
//! interfaces or remote hosts goes through these two traits, so swapping the
//! virtualization backend needs no change here.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use satlink_topology::{LinkAddrs, Neighbor, NodeRef};
use serde::{Deserialize, Serialize};

/// One side of a link: the node and the interface name it carries there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEnd {
    pub node: NodeRef,
    pub interface: String,
}

/// A link between two nodes.
///
/// `a` is the row node of the matrix cell, `b` the column node. The
/// [`LinkAddrs::a`] address always belongs to `a`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    pub a: LinkEnd,
    pub b: LinkEnd,
}

impl std::fmt::Display for LinkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.a.node, self.b.node)
    }
}

/// Link manipulation on the network substrate.
///
/// `Ok(false)` and `Err(_)` both mean the operation failed. The error form
/// carries detail for the log.
#[async_trait]
pub trait LinkOps: Send + Sync {
    /// Create the link and assign its point-to-point addresses.
    async fn create_link(&self, link: &LinkRef, addrs: &LinkAddrs) -> anyhow::Result<bool>;

    /// Remove the link.
    async fn delete_link(&self, link: &LinkRef) -> anyhow::Result<bool>;

    /// Set link shaping (one-way delay in milliseconds).
    async fn set_link_params(&self, link: &LinkRef, delay_ms: f64) -> anyhow::Result<bool>;
}

/// A neighbor discovery job for one node.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub node: NodeRef,
    /// Management address of `node`
    pub address: Ipv4Addr,
    /// Visible neighbors, in enumeration order
    pub neighbors: Vec<Neighbor>,
    /// Deadline for the whole discovery
    pub timeout: Duration,
    /// Scratch directory owned by this task; removed after the task ends
    pub work_dir: PathBuf,
}

/// A file produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// Management address of the node the artifact describes
    pub source: Ipv4Addr,
    pub path: PathBuf,
}

/// Remote command execution and artifact transfer.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Ask `request.node` to query each neighbor and return what it collected.
    async fn run_discovery(&self, request: &DiscoveryRequest) -> anyhow::Result<Vec<Artifact>>;

    /// Forward an artifact to a collector.
    async fn transfer_artifact(&self, artifact: &Artifact, collector: Ipv4Addr)
        -> anyhow::Result<bool>;
}
