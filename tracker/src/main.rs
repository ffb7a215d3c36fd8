use std::{fs::OpenOptions, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker::{config::TrackerConfig, event_loop::{self, LoopEvent}, location_source::ReplaySource, orchestrator::{SessionEvent, SessionOrchestrator}};
use workout_tracker_data_management::{DataManager, DATA_DIR};

/// Replays a recorded track through the workout tracker and prints the finished session.
#[derive(Parser)]
#[command(name = "tracker")]
struct Args {
    /// JSON-lines file of location samples
    #[arg(long)]
    replay: PathBuf,

    /// TOML config file
    #[arg(long, default_value = "tracker.toml")]
    config: PathBuf,

    /// Pace the replay by sample timestamps, this many times faster than real time
    #[arg(long)]
    speedup: Option<f64>,

    /// Overrides the data directory from the config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Continue an unfinished session instead of refusing to start
    #[arg(long, conflicts_with = "discard")]
    resume: bool,

    /// Throw away an unfinished session and start fresh
    #[arg(long)]
    discard: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = TrackerConfig::load(&args.config)?;
    let data_dir = resolve_data_dir(args.data_dir.clone(), &config)?;

    let log_dir = data_dir.join("log");
    std::fs::create_dir_all(&log_dir).with_context(|| format!("Failed to create {:?}", log_dir))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("tracker.log"))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=info,workout_tracker_data_management=info", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!(data_dir = ?data_dir, "Starting tracker...");

    let data_manager = DataManager::start(&data_dir, config.storage.batch_size).await?;
    let mut orchestrator = SessionOrchestrator::new(&config, data_manager.point_store());

    let mut resuming = false;
    if let Some(unfinished) = data_manager.unfinished_session().await? {
        if args.discard {
            data_manager.discard_session(&unfinished.session_id).await?;
        } else if args.resume {
            resuming = orchestrator.recover_on_startup().await?.is_some();
        } else {
            anyhow::bail!("Unfinished session {} found, run again with --resume or --discard", unfinished.session_id);
        }
    }

    let source = ReplaySource::from_file(&args.replay, args.speedup).await?;
    let tick_period = Duration::from_millis(config.session.tick_interval_ms);
    let (handle, session_loop) = event_loop::spawn(orchestrator, Box::new(source), tick_period);
    let mut events = handle.subscribe();

    if resuming {
        handle.resume().await?;
    } else {
        handle.start().await?;
    }

    loop {
        match events.recv().await {
            Ok(LoopEvent::SourceExhausted) => break,
            Ok(LoopEvent::Session(SessionEvent::ForcedFinish { count })) => {
                tracing::warn!(count, "Vehicle detected too often, finishing");
                break;
            },
            Ok(LoopEvent::Session(SessionEvent::VehicleWarning { count })) => {
                // Nobody to ask during a replay, so carry on as if the user confirmed
                tracing::warn!(count, "Vehicle detected, resuming replay");
                handle.resume().await?;
            },
            Ok(LoopEvent::Session(SessionEvent::SessionLost { session_id })) => {
                tracing::error!(session_id = %session_id, "Session vanished from storage");
            },
            Ok(LoopEvent::Session(event)) => tracing::info!(?event),
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Missed session events"),
            Err(RecvError::Closed) => break,
        }
    }

    let completed = handle.finish().await?;
    println!("{}", serde_json::to_string_pretty(&completed)?);

    handle.shutdown().await?;
    session_loop.await?;
    Ok(())
}

fn resolve_data_dir(cli: Option<PathBuf>, config: &TrackerConfig) -> anyhow::Result<PathBuf> {
    if let Some(dir) = cli {
        return Ok(dir);
    }

    let root = project_root::get_project_root().context("Failed to find project root")?;
    Ok(match &config.storage.data_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => root.join(dir),
        None => root.join(DATA_DIR),
    })
}
