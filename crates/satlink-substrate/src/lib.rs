//! Satlink Substrate
//!
//! Concrete [`LinkOps`](satlink_reconcile::LinkOps) and
//! [`RemoteExec`](satlink_reconcile::RemoteExec) implementations:
//!
//! - [`NetnsLinkOps`]: veth pairs between container namespaces, shaped with netem
//! - [`SshRemoteExec`]: neighbor discovery and artifact forwarding over ssh/scp
//! - [`DryRunLinkOps`] / [`DryRunRemote`]: log-only stand-ins
//!
//! All process spawning goes through a [`Runner`].

mod command;
mod dry_run;
mod netns;
mod remote;

pub use command::{CommandLine, ProcessRunner, Runner};
pub use dry_run::{DryRunLinkOps, DryRunRemote};
pub use netns::{ContainerNaming, NetnsLinkOps};
pub use remote::{SshConfig, SshRemoteExec, ARTIFACT_PATTERN};
