//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use satlink_reconcile::{
    Error, LinkOps, LinkOrchestrator, MatrixStore, ReconcileConfig, ReconciliationLoop,
    RemoteExec, ScanCoordinator, Snapshot,
};
use satlink_substrate::{DryRunLinkOps, DryRunRemote, NetnsLinkOps, SshConfig, SshRemoteExec};

use crate::cli::{Cli, Command};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = cli.reconcile_config()?;
    match &cli.command {
        Command::Run { .. } => run(&cli, config).await,
        Command::Scan { matrix } => scan(&cli, &config, matrix).await,
        Command::Teardown { matrix } => teardown(&cli, &config, matrix).await,
        Command::DomainTables { matrix, output } => {
            domain_tables(&cli, &config, matrix, output.as_deref()).await
        }
        Command::Status { matrix } => status(&cli, &config, matrix).await,
    }
}

fn substrates(cli: &Cli) -> anyhow::Result<(Arc<dyn LinkOps>, Arc<dyn RemoteExec>)> {
    if cli.dry_run {
        tracing::info!("Dry run: no interface or remote commands will be executed");
        return Ok((Arc::new(DryRunLinkOps), Arc::new(DryRunRemote)));
    }
    let ops = NetnsLinkOps::new(cli.container_naming(), cli.sudo);
    let remote = SshRemoteExec::new(SshConfig::default())?;
    Ok((Arc::new(ops), Arc::new(remote)))
}

async fn load(config: &ReconcileConfig, path: &Path) -> anyhow::Result<Snapshot> {
    MatrixStore::load_file(path, config.delimiter, config.filter)
        .await
        .with_context(|| format!("loading {}", path.display()))
}

/// The first snapshot that parses, used to size the domain.
async fn first_loadable(store: &MatrixStore) -> satlink_reconcile::Result<Snapshot> {
    for entry in store.entries() {
        match store.load(entry).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => tracing::warn!("Cannot size topology from {}: {}", entry.name(), e),
        }
    }
    Err(Error::NoSnapshots(store.dir().to_path_buf()))
}

async fn run(cli: &Cli, config: ReconcileConfig) -> anyhow::Result<()> {
    let store = MatrixStore::open(&config.input_dir, &config.extension)?
        .with_delimiter(config.delimiter)
        .with_filter(config.filter);
    let first = first_loadable(&store).await?;
    let domain = Arc::new(cli.descriptor(&first.matrix));
    tracing::info!(
        "Domain {}: {} rows x {} columns, {:?} allocation",
        domain.name,
        domain.rows.len(),
        domain.cols.len(),
        domain.link_space.scheme
    );

    let (ops, remote) = substrates(cli)?;
    let orchestrator = LinkOrchestrator::new(ops, domain.clone(), config.batch);
    let scanner = config
        .scan
        .enabled
        .then(|| ScanCoordinator::new(remote, domain.clone(), config.scan.clone()));
    let (looper, handle) = ReconciliationLoop::new(store, orchestrator, scanner, config.interval);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current cycle");
            handle.stop();
        }
    });

    let summary = looper.run().await?;
    println!(
        "{} applied, {} skipped{}",
        summary.applied,
        summary.skipped,
        if summary.stopped { ", stopped early" } else { "" }
    );
    Ok(())
}

async fn scan(cli: &Cli, config: &ReconcileConfig, path: &Path) -> anyhow::Result<()> {
    let snapshot = load(config, path).await?;
    let domain = Arc::new(cli.descriptor(&snapshot.matrix));
    let (_, remote) = substrates(cli)?;

    let report = ScanCoordinator::new(remote, domain, config.scan.clone())
        .scan(&snapshot.matrix)
        .await?;
    if report.failed() > 0 {
        tracing::warn!("{} of {} node scans failed", report.failed(), report.total());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn teardown(cli: &Cli, config: &ReconcileConfig, path: &Path) -> anyhow::Result<()> {
    let snapshot = load(config, path).await?;
    let domain = Arc::new(cli.descriptor(&snapshot.matrix));
    let (ops, _) = substrates(cli)?;

    let outcome = LinkOrchestrator::new(ops, domain, config.batch)
        .teardown(&snapshot.matrix)
        .await?;
    if outcome.failed() > 0 {
        tracing::warn!("{} link(s) could not be removed", outcome.failed());
    }
    println!("{}", outcome);
    Ok(())
}

async fn domain_tables(
    cli: &Cli,
    config: &ReconcileConfig,
    path: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let snapshot = load(config, path).await?;
    let tables = cli.descriptor(&snapshot.matrix).domain_tables(&snapshot.matrix)?;
    let json = serde_json::to_string_pretty(&tables)?;
    match output {
        Some(out) => {
            tokio::fs::write(out, json)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            tracing::info!("Wrote {} domain table(s) to {}", tables.len(), out.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn status(cli: &Cli, config: &ReconcileConfig, path: &Path) -> anyhow::Result<()> {
    let snapshot = load(config, path).await?;
    let status = cli.descriptor(&snapshot.matrix).status(&snapshot.matrix);
    println!("{}: {}", path.display(), status);
    Ok(())
}
