//! CLI entry point for offline-capture.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use offline_core::{
    CaptureConfig, DownloadEvent, DownloadManager, DownloadableContent, EntryKey, EntryStatus,
    MemoryStorage, SqliteStorage, StartOutcome, StorageGateway, WebPage,
    build_default_resolver_registry,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

mod app_config;
mod cli;

use app_config::{FileConfig, load_default_file_config};
use cli::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = if args.no_config {
        app_config::LoadedConfig::default()
    } else {
        load_default_file_config()?
    };
    let file_config = loaded.config.clone().unwrap_or_default();

    // Priority: RUST_LOG env var > CLI flags > config file > default (info)
    let default_level = args
        .log_level()
        .or_else(|| file_config.verbosity.map(app_config::VerbositySetting::filter))
        .unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, config_path = ?loaded.path, "CLI arguments parsed");

    let config = build_capture_config(&args, &file_config);
    config.validate().context("Invalid capture configuration")?;
    let storage = open_storage(&args, &file_config).await?;

    let http = config.download_client();
    let resolvers = build_default_resolver_registry(&config.resolver_client());
    let manager = DownloadManager::new(config, Arc::clone(&storage), resolvers, http.clone())?;

    let restored = manager
        .restore(WebPage::CONTENT_TYPE, |entry| {
            let url = Url::parse(&entry.id).ok()?;
            Some(Arc::new(WebPage::with_id(entry.id.clone(), url, http.clone()))
                as Arc<dyn DownloadableContent>)
        })
        .await?;
    if restored > 0 {
        info!(restored, "resuming stored entries");
    }

    let progress = if args.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };
    let stop_ui = CancellationToken::new();
    let ui = spawn_progress_ui(&manager, progress, stop_ui.clone());

    let mut invalid = 0usize;
    let mut requested = Vec::new();
    for raw in &args.urls {
        let Ok(url) = Url::parse(raw) else {
            warn!(url = %raw, "skipping invalid URL");
            invalid += 1;
            continue;
        };
        let page = Arc::new(WebPage::new(url, http.clone()));
        let key = page.key();
        if !manager.add_and_start(page) {
            let outcome = match manager.status(&key) {
                Some(EntryStatus::Failed | EntryStatus::Partial) => manager.retry(&key),
                _ => manager.start(&key),
            };
            debug!(key = %key, ?outcome, "entry already known");
            if let StartOutcome::NotStartable(status) = outcome {
                info!(key = %key, %status, "nothing left to capture");
            }
        }
        requested.push(key);
    }

    manager.wait_idle().await;
    stop_ui.cancel();
    let _ = ui.await;

    let mut failed = invalid;
    for snapshot in manager.entries() {
        if !requested.contains(&snapshot.key) {
            continue;
        }
        if snapshot.status == EntryStatus::Failed {
            failed += 1;
        }
        match &snapshot.last_error {
            Some(error) => println!("{:<10} {}  ({error})", snapshot.status, snapshot.key.id),
            None => println!("{:<10} {}", snapshot.status, snapshot.key.id),
        }
    }

    manager.close().await;
    info!(
        entries = requested.len(),
        failed,
        output = %manager.config().output_root.display(),
        "capture run finished"
    );

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// CLI flags override the config file, which overrides built-in defaults.
fn build_capture_config(args: &Args, file_config: &FileConfig) -> CaptureConfig {
    let mut config = file_config.apply(CaptureConfig::default());
    if let Some(output) = &args.output {
        config.output_root.clone_from(output);
    }
    if let Some(concurrency) = args.concurrency {
        config.max_active = usize::from(concurrency);
    }
    config
}

async fn open_storage(args: &Args, file_config: &FileConfig) -> Result<Arc<dyn StorageGateway>> {
    match args.db.as_ref().or(file_config.db_path.as_ref()) {
        Some(path) => {
            let storage = SqliteStorage::new(path)
                .await
                .with_context(|| format!("Failed to open state database '{}'", path.display()))?;
            Ok(Arc::new(storage))
        }
        None => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// Draws one bar per entry from the manager's event stream until `stop` fires.
fn spawn_progress_ui(
    manager: &DownloadManager,
    progress: MultiProgress,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut events = manager.subscribe();
    let style = ProgressStyle::with_template("{prefix:>10} [{bar:30}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    tokio::spawn(async move {
        let mut bars: HashMap<EntryKey, ProgressBar> = HashMap::new();
        loop {
            let event = tokio::select! {
                () = stop.cancelled() => break,
                event = events.recv() => event,
            };
            let event = match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress UI lagged behind events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let bar = bars.entry(event.key().clone()).or_insert_with(|| {
                let bar = progress.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_message(event.key().id.clone());
                bar
            });
            match event {
                DownloadEvent::StatusChanged { status, .. } => {
                    bar.set_prefix(status.to_string());
                    if status.is_terminal() || status == EntryStatus::Partial {
                        bar.finish();
                    }
                }
                DownloadEvent::ProgressChanged { progress, .. } => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    bar.set_position((progress * 100.0).round() as u64);
                }
                DownloadEvent::Failed { message, .. } => bar.abandon_with_message(message),
            }
        }
        for bar in bars.values() {
            if !bar.is_finished() {
                bar.finish();
            }
        }
    })
}
