use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workout_tracker_data_management::{DataManager, DataManagerError, DATA_DIR, DEFAULT_BATCH_SIZE};

// CLI for manual data operations
#[derive(Parser)]
#[command(name = "workout-data")]
#[command(about = "Inspect and clean up locally stored workout sessions", long_about = None)]
struct Cli {
    /// Data directory, defaults to data/ under the project root
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the unfinished session, if any
    Unfinished,
    /// Print the points of a session as JSON lines
    Points { session_id: String },
    /// Delete a session and its buffer file. BE CAREFUL
    Discard { session_id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), DataManagerError> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => project_root::get_project_root()
            .map_err(|e| DataManagerError::Database(format!("Failed to find project root: {e}")))?
            .join(DATA_DIR),
    };

    let data_manager = DataManager::start(&data_dir, DEFAULT_BATCH_SIZE).await?;

    match &cli.command {
        Commands::Unfinished => {
            match data_manager.unfinished_session().await? {
                Some(session) => {
                    let points = data_manager.session_points(&session.session_id).await?;
                    println!("{} started {} | {:.1} m | {} s | {} points",
                        session.session_id, session.start_time, session.total_distance_meters, session.duration_seconds, points.len());
                },
                None => println!("No unfinished session"),
            }
        },
        Commands::Points { session_id } => {
            for point in data_manager.session_points(session_id).await? {
                let line = serde_json::to_string(&point)
                    .map_err(|e| DataManagerError::Database(format!("Failed to encode point: {e}")))?;
                println!("{line}");
            }
        },
        Commands::Discard { session_id } => {
            data_manager.discard_session(session_id).await?;
            println!("Discarded {session_id}");
        },
    }

    Ok(())
}
