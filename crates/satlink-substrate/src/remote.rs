//! Discovery and artifact transfer over ssh/scp.
//!
//! A node's management address is reached with `ssh`. Discovery asks the node
//! to query every visible neighbor, then pulls the resulting
//! `node_status-<ip>.yaml` files into the task's work directory. Only files
//! that arrived are cleared on the node; the rest wait for the next scan.
//! Transfer pushes one file to a collector with `scp`.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use satlink_reconcile::{Artifact, DiscoveryRequest, RemoteExec};

use crate::command::{CommandLine, ProcessRunner, Runner};

/// Artifact file names produced by the discovery command.
pub const ARTIFACT_PATTERN: &str = r"^node_status-(\d+\.\d+\.\d+\.\d+)\.yaml$";

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    /// Directory holding artifacts on nodes and collectors
    pub remote_dir: String,
    /// Run on the node once per neighbor, with `-u <user> -i <neighbor>` appended
    pub discovery_command: String,
    /// Extra `-o` options passed to both ssh and scp
    pub options: Vec<String>,
    /// Kill any single ssh/scp invocation running longer than this
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            remote_dir: "/home/resource_manager/resource_info".to_string(),
            discovery_command: "/home/resource_manager/resource_request.sh".to_string(),
            options: vec![
                "StrictHostKeyChecking=no".to_string(),
                "ConnectTimeout=10".to_string(),
            ],
            command_timeout: Duration::from_secs(120),
        }
    }
}

/// [`RemoteExec`] backed by the system `ssh` and `scp` clients.
pub struct SshRemoteExec {
    runner: Arc<dyn Runner>,
    config: SshConfig,
    pattern: Regex,
}

impl SshRemoteExec {
    pub fn new(config: SshConfig) -> anyhow::Result<Self> {
        let runner = ProcessRunner::with_timeout(config.command_timeout);
        Self::with_runner(Arc::new(runner), config)
    }

    pub fn with_runner(runner: Arc<dyn Runner>, config: SshConfig) -> anyhow::Result<Self> {
        Ok(Self {
            runner,
            config,
            pattern: Regex::new(ARTIFACT_PATTERN)?,
        })
    }

    fn client(&self, program: &str) -> CommandLine {
        self.config
            .options
            .iter()
            .fold(CommandLine::new(program), |cmd, opt| {
                cmd.arg("-o").arg(opt.as_str())
            })
    }

    fn ssh(&self, host: Ipv4Addr, remote: String) -> CommandLine {
        self.client("ssh")
            .arg(format!("{}@{}", self.config.user, host))
            .arg(remote)
    }

    /// Source address encoded in an artifact file name.
    pub fn parse_artifact_name(&self, name: &str) -> Option<Ipv4Addr> {
        self.pattern
            .captures(name.trim())
            .and_then(|caps| caps.get(1))
            .and_then(|ip| ip.as_str().parse().ok())
    }

    async fn query_neighbors(&self, request: &DiscoveryRequest) -> anyhow::Result<()> {
        let queries = request.neighbors.iter().map(|neighbor| {
            let cmd = self.ssh(
                request.address,
                format!(
                    "{} -u {} -i {}",
                    self.config.discovery_command, self.config.user, neighbor.address
                ),
            );
            async move { (neighbor, self.runner.run(&cmd).await) }
        });

        let mut failed = 0;
        for (neighbor, result) in join_all(queries).await {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!("{} could not query {}: {:#}", request.node, neighbor.node, e);
            }
        }
        if failed > 0 && failed == request.neighbors.len() {
            anyhow::bail!("every neighbor query from {} failed", request.node);
        }
        Ok(())
    }

    async fn fetch(&self, host: Ipv4Addr, name: &str, dest: &Path) -> anyhow::Result<()> {
        let cmd = self
            .client("scp")
            .arg(format!(
                "{}@{}:{}/{}",
                self.config.user, host, self.config.remote_dir, name
            ))
            .arg(dest.display().to_string());
        self.runner.run(&cmd).await?;
        Ok(())
    }

    /// Remove pulled artifacts from the node.
    async fn clear(&self, host: Ipv4Addr, artifacts: &[Artifact]) {
        if artifacts.is_empty() {
            return;
        }
        let paths: Vec<String> = artifacts
            .iter()
            .map(|a| format!("{}/{}", self.config.remote_dir, a.name))
            .collect();
        let rm = self.ssh(host, format!("rm -f {}", paths.join(" ")));
        if let Err(e) = self.runner.run(&rm).await {
            tracing::debug!("Artifacts left on {}: {:#}", host, e);
        }
    }

    async fn discover(&self, request: &DiscoveryRequest) -> anyhow::Result<Vec<Artifact>> {
        self.query_neighbors(request).await?;

        let listing = self
            .runner
            .run(&self.ssh(request.address, format!("ls -1 {}", self.config.remote_dir)))
            .await
            .with_context(|| format!("listing artifacts on {}", request.node))?;

        let mut artifacts = Vec::new();
        let mut missed = 0;
        for name in listing.lines().map(str::trim) {
            let Some(source) = self.parse_artifact_name(name) else {
                continue;
            };
            let path = request.work_dir.join(name);
            if let Err(e) = self.fetch(request.address, name, &path).await {
                missed += 1;
                tracing::warn!("Cannot fetch {} from {}: {:#}", name, request.node, e);
                continue;
            }
            artifacts.push(Artifact {
                name: name.to_string(),
                source,
                path,
            });
        }
        if artifacts.is_empty() && missed > 0 {
            anyhow::bail!("none of {} artifact(s) on {} could be fetched", missed, request.node);
        }

        self.clear(request.address, &artifacts).await;
        Ok(artifacts)
    }
}

#[async_trait]
impl RemoteExec for SshRemoteExec {
    async fn run_discovery(&self, request: &DiscoveryRequest) -> anyhow::Result<Vec<Artifact>> {
        match tokio::time::timeout(request.timeout, self.discover(request)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!(
                "discovery on {} timed out after {:?}",
                request.node,
                request.timeout
            ),
        }
    }

    async fn transfer_artifact(
        &self,
        artifact: &Artifact,
        collector: Ipv4Addr,
    ) -> anyhow::Result<bool> {
        let cmd = self
            .client("scp")
            .arg(artifact.path.display().to_string())
            .arg(format!(
                "{}@{}:{}",
                self.config.user, collector, self.config.remote_dir
            ));
        self.runner.run(&cmd).await?;
        Ok(true)
    }
}
