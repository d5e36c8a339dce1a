//! CLI entry point for the titleferry tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use titleferry::install::{DirInstallService, QrInstallPlan, TicketInstallBackend, is_ticket_path};
use titleferry::transfer::{FsCopyBackend, RunOutcome, TransferBackend, TransferEngine};
use titleferry::{InstallService, UrlInstallBackend};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let show_progress = !args.no_progress && !args.quiet;

    let outcome = match args.command {
        Command::Copy {
            sources,
            dest,
            skip_failures,
        } => {
            let items = sources
                .into_iter()
                .map(|src| {
                    let name = src
                        .file_name()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| src.clone());
                    let dst = dest.join(name);
                    (src, dst)
                })
                .collect();
            let backend = FsCopyBackend::new(items).skip_failures(skip_failures);
            run_with_progress(backend, show_progress).await?
        }

        Command::InstallTickets { dir, stage, delete } => {
            let entries = list_dir(&dir).await?;
            if !entries.iter().any(|p| is_ticket_path(p)) {
                bail!("no .tik files found in {}", dir.display());
            }
            let service: Arc<dyn InstallService> = Arc::new(DirInstallService::new(stage));
            let backend =
                TicketInstallBackend::all_tickets(entries, service).delete_after_install(delete);
            run_with_progress(backend, show_progress).await?
        }

        Command::InstallUrl {
            urls,
            stage,
            old_model,
        } => {
            let service: Arc<dyn InstallService> =
                Arc::new(DirInstallService::new(stage).with_new_model(!old_model));
            let backend = UrlInstallBackend::new(urls, service);
            run_with_progress(backend, show_progress).await?
        }

        Command::Qr { payload, stage } => {
            let text = tokio::fs::read_to_string(&payload)
                .await
                .with_context(|| format!("reading payload {}", payload.display()))?;
            let Some(plan) = QrInstallPlan::from_payload(&text) else {
                bail!("payload contains no URLs");
            };
            info!(urls = plan.urls().len(), "decoded QR payload");
            let service: Arc<dyn InstallService> = Arc::new(DirInstallService::new(stage));
            let backend = plan.into_backend(service);
            run_with_progress(backend, show_progress).await?
        }
    };

    info!(
        completed = outcome.completed,
        failed = outcome.failed,
        premature = outcome.premature,
        "run finished"
    );

    if outcome.premature {
        bail!("run stopped before completing all items");
    }
    Ok(())
}

/// Spawns the engine worker and polls its snapshot onto a progress bar.
/// Ctrl-C raises the cooperative cancel flag instead of killing the
/// process mid-write.
async fn run_with_progress<B>(backend: B, show_progress: bool) -> Result<RunOutcome>
where
    B: TransferBackend + 'static,
{
    let (session, worker) = TransferEngine::new().spawn(backend);

    let cancel_session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancel requested");
            cancel_session.request_cancel();
        }
    });

    let bar = progress_bar(show_progress);
    loop {
        let snap = session.snapshot();
        if let Some(bar) = &bar {
            bar.set_message(format!(
                "{} / {} items, {:.2} MB / {:.2} MB",
                snap.items_done,
                snap.items_total,
                to_mib(snap.bytes_done),
                to_mib(snap.bytes_total),
            ));
            bar.set_position((snap.fraction() * 100.0) as u64);
        }
        if snap.finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    worker.await.context("transfer worker panicked")
}

fn progress_bar(show: bool) -> Option<ProgressBar> {
    if !show {
        return None;
    }
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    Some(bar)
}

fn to_mib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Lists a directory's entries as full paths, sorted by name.
async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing {}", dir.display()))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}
