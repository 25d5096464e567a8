//! Recording fakes for the substrate boundaries.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use satlink_topology::LinkAddrs;

use crate::ops::{Artifact, DiscoveryRequest, LinkOps, LinkRef, RemoteExec};

/// One recorded [`LinkOps`] call. Links are identified by their display form.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { link: String, a: String, b: String },
    Delete { link: String },
    SetParams { link: String, delay_ms: f64 },
}

impl Call {
    pub fn kind(&self) -> &'static str {
        match self {
            Call::Create { .. } => "create",
            Call::Delete { .. } => "delete",
            Call::SetParams { .. } => "set",
        }
    }
}

/// Records every call; selected links return `Ok(false)` or `Err`.
#[derive(Debug, Default)]
pub struct RecordingLinkOps {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    erroring: Mutex<HashSet<String>>,
}

impl RecordingLinkOps {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make every call on `link` report failure.
    pub fn fail_link(&self, link: &str) {
        self.failing.lock().unwrap().insert(link.to_string());
    }

    /// Make every call on `link` return an error.
    pub fn error_link(&self, link: &str) {
        self.erroring.lock().unwrap().insert(link.to_string());
    }

    fn record(&self, call: Call, link: &LinkRef) -> anyhow::Result<bool> {
        self.calls.lock().unwrap().push(call);
        let key = link.to_string();
        if self.erroring.lock().unwrap().contains(&key) {
            anyhow::bail!("substrate rejected {key}");
        }
        Ok(!self.failing.lock().unwrap().contains(&key))
    }
}

#[async_trait]
impl LinkOps for RecordingLinkOps {
    async fn create_link(&self, link: &LinkRef, addrs: &LinkAddrs) -> anyhow::Result<bool> {
        let call = Call::Create {
            link: link.to_string(),
            a: addrs.a_cidr(),
            b: addrs.b_cidr(),
        };
        self.record(call, link)
    }

    async fn delete_link(&self, link: &LinkRef) -> anyhow::Result<bool> {
        self.record(Call::Delete { link: link.to_string() }, link)
    }

    async fn set_link_params(&self, link: &LinkRef, delay_ms: f64) -> anyhow::Result<bool> {
        let call = Call::SetParams {
            link: link.to_string(),
            delay_ms,
        };
        self.record(call, link)
    }
}

/// Discovery fake that writes one artifact per neighbor into the work dir.
///
/// Nodes named in `hang` never finish, `panic` panics, `fail` returns an
/// error.
#[derive(Debug, Default)]
pub struct FakeRemote {
    pub hang: HashSet<String>,
    pub panic: HashSet<String>,
    pub fail: HashSet<String>,
    discoveries: Mutex<Vec<(String, Vec<Ipv4Addr>)>>,
    transfers: Mutex<Vec<(String, Ipv4Addr)>>,
    work_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeRemote {
    pub fn hanging(nodes: &[&str]) -> Self {
        Self {
            hang: nodes.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn panicking(nodes: &[&str]) -> Self {
        Self {
            panic: nodes.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing(nodes: &[&str]) -> Self {
        Self {
            fail: nodes.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    /// `(node name, neighbor addresses)` per discovery call.
    pub fn discoveries(&self) -> Vec<(String, Vec<Ipv4Addr>)> {
        let mut out = self.discoveries.lock().unwrap().clone();
        out.sort();
        out
    }

    /// `(artifact name, collector)` per transfer.
    pub fn transfers(&self) -> Vec<(String, Ipv4Addr)> {
        let mut out = self.transfers.lock().unwrap().clone();
        out.sort();
        out
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.work_dirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExec for FakeRemote {
    async fn run_discovery(&self, request: &DiscoveryRequest) -> anyhow::Result<Vec<Artifact>> {
        let name = request.node.name();
        self.discoveries.lock().unwrap().push((
            name.clone(),
            request.neighbors.iter().map(|n| n.address).collect(),
        ));
        self.work_dirs.lock().unwrap().push(request.work_dir.clone());

        if self.hang.contains(&name) {
            std::future::pending::<()>().await;
        }
        if self.panic.contains(&name) {
            panic!("discovery on {name} blew up");
        }
        if self.fail.contains(&name) {
            anyhow::bail!("console on {name} unreachable");
        }

        let mut artifacts = Vec::new();
        for neighbor in &request.neighbors {
            let file = format!("node_status-{}.yaml", neighbor.address);
            let path = request.work_dir.join(&file);
            std::fs::write(&path, format!("node: {}\n", neighbor.node))?;
            artifacts.push(Artifact {
                name: file,
                source: neighbor.address,
                path,
            });
        }
        Ok(artifacts)
    }

    async fn transfer_artifact(
        &self,
        artifact: &Artifact,
        collector: Ipv4Addr,
    ) -> anyhow::Result<bool> {
        self.transfers
            .lock()
            .unwrap()
            .push((artifact.name.clone(), collector));
        Ok(artifact.path.exists())
    }
}
