//! Substrates that only log.
//!
//! Used to rehearse a snapshot sequence without touching interfaces or
//! remote hosts. Every operation succeeds.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use satlink_reconcile::{Artifact, DiscoveryRequest, LinkOps, LinkRef, RemoteExec};
use satlink_topology::LinkAddrs;

#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunLinkOps;

#[async_trait]
impl LinkOps for DryRunLinkOps {
    async fn create_link(&self, link: &LinkRef, addrs: &LinkAddrs) -> anyhow::Result<bool> {
        tracing::info!(
            "[dry-run] create {} ({} {} <-> {} {})",
            link,
            link.a.interface,
            addrs.a_cidr(),
            link.b.interface,
            addrs.b_cidr()
        );
        Ok(true)
    }

    async fn delete_link(&self, link: &LinkRef) -> anyhow::Result<bool> {
        tracing::info!("[dry-run] delete {}", link);
        Ok(true)
    }

    async fn set_link_params(&self, link: &LinkRef, delay_ms: f64) -> anyhow::Result<bool> {
        tracing::info!("[dry-run] shape {} delay={}ms", link, delay_ms);
        Ok(true)
    }
}

/// Discovery that reports what it would query and collects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRemote;

#[async_trait]
impl RemoteExec for DryRunRemote {
    async fn run_discovery(&self, request: &DiscoveryRequest) -> anyhow::Result<Vec<Artifact>> {
        let targets: Vec<String> = request
            .neighbors
            .iter()
            .map(|n| n.address.to_string())
            .collect();
        tracing::info!(
            "[dry-run] {} ({}) would query {}",
            request.node,
            request.address,
            targets.join(", ")
        );
        Ok(Vec::new())
    }

    async fn transfer_artifact(
        &self,
        artifact: &Artifact,
        collector: Ipv4Addr,
    ) -> anyhow::Result<bool> {
        tracing::info!("[dry-run] send {} to {}", artifact.name, collector);
        Ok(true)
    }
}
