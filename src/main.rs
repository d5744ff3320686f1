//! Binary entrypoint for the signage frame.
//!
//! Wires the library tasks together; no local modules here.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use rust_signage_frame::config::{Configuration, SurfaceKind};
use rust_signage_frame::device::{self, DeviceTier};
use rust_signage_frame::events::PlaybackEvent;
use rust_signage_frame::media::classify_listing;
use rust_signage_frame::remote::{ControlSource, FileLister, HttpFileLister, SupabaseControl};
use rust_signage_frame::tasks::sequencer::{self, FramePolicy, SequencerOptions};
use rust_signage_frame::tasks::{control, surface};

#[derive(Debug, Parser)]
#[command(
    name = "signage-frame",
    version,
    about = "Full-screen slideshow client driven by a remote control row"
)]
struct Args {
    /// Path to YAML config (API_URL, BEARER_TOKEN, SUPABASE_URL and SUPABASE_KEY override it)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log frames instead of launching mpv
    #[arg(long)]
    headless: bool,
    /// Resolve the active folder, print the classified media list and exit
    #[arg(long)]
    dry_run: bool,
    /// Increase log verbosity (repeatable); ignored when RUST_LOG is set
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "info",
        1 => "info,rust_signage_frame=debug",
        _ => "debug,rust_signage_frame=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        headless,
        dry_run,
        verbose,
    } = Args::parse();
    init_tracing(verbose);

    let mut cfg = Configuration::load(config.as_deref()).with_context(|| match &config {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;
    if headless {
        cfg.player.surface = SurfaceKind::Headless;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!(
        api_url = %cfg.listing.api_url,
        control_url = %cfg.remote_control.url,
        table = %cfg.remote_control.table,
        poll_interval = %humantime::format_duration(cfg.remote_control.poll_interval),
        image_dwell = %humantime::format_duration(cfg.slideshow.image_dwell),
        surface = ?cfg.player.surface,
        "configuration loaded"
    );

    let tier = device::detect(&cfg.device);
    let control_source =
        SupabaseControl::new(&cfg.remote_control).context("failed to build control client")?;
    let lister = Arc::new(HttpFileLister::new(&cfg.listing).context("failed to build listing client")?);

    if dry_run {
        return run_dry_run(&cfg, &control_source, lister.as_ref(), tier).await;
    }

    let cancel = CancellationToken::new();
    spawn_shutdown_watchers(&cancel);

    let (playback_tx, playback_rx) = mpsc::channel::<PlaybackEvent>(16); // Surface -> Sequencer
    let surface = surface::from_options(&cfg.player, playback_tx);
    let subscription =
        control::subscribe(control_source, cfg.remote_control.poll_interval, &cancel);

    let options = SequencerOptions {
        image_dwell: cfg.slideshow.image_dwell,
        folder_root: cfg.listing.folder_root.clone(),
        tier,
        frames: FramePolicy::new(&cfg.slideshow, &cfg.player),
    };

    sequencer::run(subscription, playback_rx, lister, surface, options, cancel.clone())
        .await
        .context("sequencer failed")?;
    cancel.cancel();
    tracing::info!("shutdown complete");
    Ok(())
}

fn spawn_shutdown_watchers(cancel: &CancellationToken) {
    // Ctrl-D on an interactive terminal stops the show.
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sigterm.recv() => {
                            tracing::info!("SIGTERM received; initiating shutdown");
                            cancel.cancel();
                        }
                    }
                }
                Err(err) => tracing::warn!("failed to register SIGTERM handler: {err}"),
            }
        });
    }
}

async fn run_dry_run(
    cfg: &Configuration,
    control: &impl ControlSource,
    lister: &impl FileLister,
    tier: DeviceTier,
) -> Result<()> {
    let folder = control
        .fetch_active()
        .await
        .context("failed to resolve the active folder")?;
    let path = folder.path(&cfg.listing.folder_root);
    let files = lister
        .list_files(&path)
        .await
        .with_context(|| format!("failed to list {path}"))?;
    let items = classify_listing(files, tier);

    println!(
        "# dry run\n# folder: {}\n# device tier: {:?}\n# items: {}\n",
        path,
        tier,
        items.len()
    );
    if items.is_empty() {
        println!("(folder is empty; the frame would stay on the placeholder)");
        return Ok(());
    }
    for (idx, item) in items.iter().enumerate() {
        println!("  {:>4}: {:<10} {}", idx, item.content_type().to_string(), item.url());
    }
    Ok(())
}
