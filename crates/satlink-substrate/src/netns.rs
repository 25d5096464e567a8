//! veth links between container network namespaces.
//!
//! Each node runs in a container. A link is a veth pair whose ends are moved
//! into the two containers' namespaces and addressed from the link's /30.
//! Delay is shaped with netem on the `a` end only.

use std::sync::Arc;

use async_trait::async_trait;
use satlink_reconcile::{LinkEnd, LinkOps, LinkRef};
use satlink_topology::{LinkAddrs, NodeClass, NodeRef};

use crate::command::{CommandLine, ProcessRunner, Runner};

/// Container name prefixes per node class. The ordinal is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNaming {
    pub relay: String,
    pub sensing: String,
    pub constellation: String,
}

impl Default for ContainerNaming {
    fn default() -> Self {
        Self {
            relay: "clab-sat-network-TSN".to_string(),
            sensing: "clab-sat-network-YG".to_string(),
            constellation: "clab-sat-network-XW".to_string(),
        }
    }
}

impl ContainerNaming {
    /// Container hosting `node`.
    pub fn container(&self, node: &NodeRef) -> String {
        let prefix = match node.class {
            NodeClass::Relay => &self.relay,
            NodeClass::Sensing => &self.sensing,
            NodeClass::Constellation => &self.constellation,
        };
        format!("{}{}", prefix, node.ordinal)
    }
}

/// [`LinkOps`] over `ip`, `nsenter`, `docker` and `tc`.
pub struct NetnsLinkOps {
    runner: Arc<dyn Runner>,
    naming: ContainerNaming,
    sudo: bool,
}

impl NetnsLinkOps {
    pub fn new(naming: ContainerNaming, sudo: bool) -> Self {
        Self::with_runner(Arc::new(ProcessRunner::new()), naming, sudo)
    }

    pub fn with_runner(runner: Arc<dyn Runner>, naming: ContainerNaming, sudo: bool) -> Self {
        Self {
            runner,
            naming,
            sudo,
        }
    }

    async fn pid(&self, container: &str) -> anyhow::Result<u32> {
        let cmd = CommandLine::new("docker").args(["inspect", "-f", "{{.State.Pid}}", container]);
        let out = self.runner.run(&cmd).await?;
        let pid = out.trim();
        match pid.parse::<u32>() {
            Ok(0) | Err(_) => anyhow::bail!("container {container} has no running pid ({pid:?})"),
            Ok(pid) => Ok(pid),
        }
    }

    fn in_netns(&self, pid: u32) -> CommandLine {
        CommandLine::new("nsenter")
            .args(["-t", &pid.to_string(), "-n", "ip"])
            .sudo(self.sudo)
    }

    /// Move one veth end into its container and address it.
    async fn attach(&self, end: &LinkEnd, cidr: &str) -> anyhow::Result<()> {
        let pid = self.pid(&self.naming.container(&end.node)).await?;
        let steps = [
            CommandLine::new("ip")
                .args(["link", "set", &end.interface, "netns", &pid.to_string()])
                .sudo(self.sudo),
            self.in_netns(pid).args(["link", "set", &end.interface, "up"]),
            self.in_netns(pid).args(["addr", "add", cidr, "dev", &end.interface]),
        ];
        for step in &steps {
            self.runner.run(step).await?;
        }
        Ok(())
    }

    async fn detach(&self, end: &LinkEnd) -> anyhow::Result<()> {
        let pid = self.pid(&self.naming.container(&end.node)).await?;
        let cmd = self.in_netns(pid).args(["link", "delete", &end.interface]);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    /// Best-effort removal of a partially created pair.
    ///
    /// The `a` end is either still in the host namespace or already inside
    /// its container; deleting it removes the peer as well.
    async fn discard(&self, link: &LinkRef) {
        let host = CommandLine::new("ip")
            .args(["link", "delete", link.a.interface.as_str()])
            .sudo(self.sudo);
        let Err(e) = self.runner.run(&host).await else {
            return;
        };
        tracing::debug!("{} not in host namespace: {:#}", link.a.interface, e);
        if let Err(e) = self.detach(&link.a).await {
            tracing::warn!("Could not clean up half-created {}: {:#}", link, e);
        }
    }
}

#[async_trait]
impl LinkOps for NetnsLinkOps {
    async fn create_link(&self, link: &LinkRef, addrs: &LinkAddrs) -> anyhow::Result<bool> {
        let pair = CommandLine::new("ip")
            .args([
                "link",
                "add",
                &link.a.interface,
                "type",
                "veth",
                "peer",
                "name",
                &link.b.interface,
            ])
            .sudo(self.sudo);
        self.runner.run(&pair).await?;
        let attached = match self.attach(&link.a, &addrs.a_cidr()).await {
            Ok(()) => self.attach(&link.b, &addrs.b_cidr()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = attached {
            self.discard(link).await;
            return Err(e);
        }
        tracing::debug!("Created {} ({} <-> {})", link, addrs.a, addrs.b);
        Ok(true)
    }

    async fn delete_link(&self, link: &LinkRef) -> anyhow::Result<bool> {
        // Deleting either end of a veth pair removes both
        match self.detach(&link.a).await {
            Ok(()) => Ok(true),
            Err(first) => {
                tracing::debug!("Delete via {} failed: {:#}", link.a.interface, first);
                self.detach(&link.b).await.map(|()| true)
            }
        }
    }

    async fn set_link_params(&self, link: &LinkRef, delay_ms: f64) -> anyhow::Result<bool> {
        let container = self.naming.container(&link.a.node);
        let iface = link.a.interface.as_str();
        let tc = |verb: &str| {
            CommandLine::new("docker")
                .args(["exec", container.as_str(), "tc", "qdisc", verb, "dev", iface, "root"])
        };

        // No qdisc yet on a fresh link
        if let Err(e) = self.runner.run(&tc("del")).await {
            tracing::debug!("No qdisc to clear on {}: {:#}", link.a.interface, e);
        }
        let add = tc("add").args(["netem", "delay", &format!("{}ms", delay_ms)]);
        self.runner.run(&add).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use satlink_topology::{AddressAllocator, Cell, DomainDescriptor};

    fn link(domain: &DomainDescriptor, cell: Cell) -> LinkRef {
        let (a, b) = domain.endpoints(cell).unwrap();
        let (if_a, if_b) = domain.interface_names(&a, &b);
        LinkRef {
            a: LinkEnd { node: a, interface: if_a },
            b: LinkEnd { node: b, interface: if_b },
        }
    }

    fn ops(runner: &Arc<ScriptedRunner>) -> NetnsLinkOps {
        NetnsLinkOps::with_runner(runner.clone(), ContainerNaming::default(), true)
    }

    #[test]
    fn container_names_follow_class() {
        let d = DomainDescriptor::relay_access(8, 12, 46);
        let (tsn, xw) = d.endpoints(Cell::new(2, 13)).unwrap();
        let naming = ContainerNaming::default();
        assert_eq!(naming.container(&tsn), "clab-sat-network-TSN3");
        assert_eq!(naming.container(&xw), "clab-sat-network-XW2");
    }

    #[tokio::test]
    async fn create_builds_veth_pair_across_namespaces() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .reply("TSN1", "101\n")
                .reply("YG2", "202\n"),
        );
        let d = DomainDescriptor::relay_access(1, 2, 0);
        let alloc = AddressAllocator::new(d.link_space.clone(), d.symmetric);
        let addrs = alloc.allocate(1, 2).unwrap();

        let ok = ops(&runner)
            .create_link(&link(&d, Cell::new(0, 1)), &addrs)
            .await
            .unwrap();
        assert!(ok);

        let seen = runner.seen();
        assert_eq!(seen[0], "sudo ip link add tsn1-yg2 type veth peer name yg2-tsn1");
        assert_eq!(seen[1], "docker inspect -f {{.State.Pid}} clab-sat-network-TSN1");
        assert_eq!(seen[2], "sudo ip link set tsn1-yg2 netns 101");
        assert_eq!(seen[3], "sudo nsenter -t 101 -n ip link set tsn1-yg2 up");
        assert_eq!(
            seen[4],
            format!("sudo nsenter -t 101 -n ip addr add {} dev tsn1-yg2", addrs.a_cidr())
        );
        assert_eq!(seen[6], "sudo ip link set yg2-tsn1 netns 202");
        assert_eq!(seen.len(), 9);
    }

    #[tokio::test]
    async fn failed_create_removes_pair_from_host() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .fail("clab-sat-network-XW1")
                .reply("inspect", "7"),
        );
        let d = DomainDescriptor::constellation_mesh(2, 20);
        let alloc = AddressAllocator::new(d.link_space.clone(), d.symmetric);
        let addrs = alloc.allocate(1, 2).unwrap();

        let err = ops(&runner)
            .create_link(&link(&d, Cell::new(0, 1)), &addrs)
            .await;
        assert!(err.is_err());
        assert_eq!(runner.seen().last().unwrap(), "sudo ip link delete 1-2");
    }

    #[tokio::test]
    async fn failed_peer_attach_removes_moved_end() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .reply("TSN1", "101\n")
                .fail("YG2")
                .fail("sudo ip link delete"),
        );
        let d = DomainDescriptor::relay_access(1, 2, 0);
        let alloc = AddressAllocator::new(d.link_space.clone(), d.symmetric);
        let addrs = alloc.allocate(1, 2).unwrap();

        let err = ops(&runner)
            .create_link(&link(&d, Cell::new(0, 1)), &addrs)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("YG2"));

        let seen = runner.seen();
        let tail = &seen[seen.len() - 3..];
        assert_eq!(tail[0], "sudo ip link delete tsn1-yg2");
        assert_eq!(tail[1], "docker inspect -f {{.State.Pid}} clab-sat-network-TSN1");
        assert_eq!(tail[2], "sudo nsenter -t 101 -n ip link delete tsn1-yg2");
    }

    #[tokio::test]
    async fn create_fails_when_container_is_missing() {
        let runner = Arc::new(ScriptedRunner::default().reply("inspect", "\n"));
        let d = DomainDescriptor::constellation_mesh(2, 20);
        let alloc = AddressAllocator::new(d.link_space.clone(), d.symmetric);
        let addrs = alloc.allocate(1, 2).unwrap();
        let err = ops(&runner)
            .create_link(&link(&d, Cell::new(0, 1)), &addrs)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("clab-sat-network-XW1"));
    }

    #[tokio::test]
    async fn delete_falls_back_to_peer_end() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .fail("clab-sat-network-XW1")
                .reply("clab-sat-network-XW2", "77"),
        );
        let d = DomainDescriptor::constellation_mesh(2, 20);
        let ok = ops(&runner)
            .delete_link(&link(&d, Cell::new(0, 1)))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(
            runner.seen().last().unwrap(),
            "sudo nsenter -t 77 -n ip link delete 2-1"
        );
    }

    #[tokio::test]
    async fn shaping_replaces_qdisc_on_a_end() {
        let runner = Arc::new(ScriptedRunner::default().fail("qdisc del"));
        let d = DomainDescriptor::constellation_mesh(2, 20);
        let ok = ops(&runner)
            .set_link_params(&link(&d, Cell::new(0, 1)), 4.0)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(
            runner.seen(),
            vec![
                "docker exec clab-sat-network-XW1 tc qdisc del dev 1-2 root".to_string(),
                "docker exec clab-sat-network-XW1 tc qdisc add dev 1-2 root netem delay 4ms"
                    .to_string(),
            ]
        );
    }
}
