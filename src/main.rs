//! The `podweave` binary: `transcribe` runs Stage A, `seed` runs Stage B.
//!
//! Exit codes: 0 success, 1 all episodes failed, 2 quota reached with clean
//! state, 3 fatal configuration error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use podweave::config::Config;
use podweave::episode::JsonManifestFeed;
use podweave::gateway::LlmGateway;
use podweave::gateway::http_provider::HttpLanguageModel;
use podweave::graph::FileGraphStore;
use podweave::quota::StateFile;
use podweave::seeding::{SeedingError, SeedingExecutor};
use podweave::shutdown;
use podweave::store::ProgressStore;
use podweave::transcribe::{HttpAudioFetcher, MetadataIndex, TranscriptionOrchestrator};

#[derive(Parser)]
#[command(
    name = "podweave",
    version,
    about = "Podcast feeds → WebVTT transcripts → knowledge graph"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcribe feed episodes to WebVTT files.
    Transcribe {
        /// Path to a JSON episode manifest (RSS adapters produce one).
        #[arg(long)]
        feed: PathBuf,
        /// Override MAX_EPISODES_PER_RUN.
        #[arg(long)]
        max: Option<usize>,
        /// Resume from an active checkpoint.
        #[arg(long)]
        resume: bool,
    },
    /// Seed the knowledge graph from a VTT file or directory.
    Seed {
        #[arg(long)]
        input: PathBuf,
    },
}

const EXIT_CONFIG: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let code = match cli.command {
        Command::Transcribe { feed, max, resume } => transcribe(config, feed, max, resume).await,
        Command::Seed { input } => seed(config, input).await,
    };
    ExitCode::from(code)
}

fn build_gateway(config: &Config, state: Arc<StateFile>) -> Result<Arc<LlmGateway>, u8> {
    let Some(endpoint) = config.model.endpoint.clone() else {
        eprintln!("MODEL_ENDPOINT is not set; the gateway has no provider to call");
        return Err(EXIT_CONFIG);
    };
    let provider = Arc::new(HttpLanguageModel::new(endpoint, config.model.name.clone()));
    Ok(Arc::new(LlmGateway::new(config, provider, state)))
}

async fn transcribe(
    mut config: Config,
    feed: PathBuf,
    max: Option<usize>,
    resume: bool,
) -> u8 {
    if let Some(max) = max {
        config.max_episodes_per_run = max;
    }
    config.resume = config.resume || resume;

    let state = StateFile::load(config.quota_state_path()).await;
    let gateway = match build_gateway(&config, state) {
        Ok(gateway) => gateway,
        Err(code) => return code,
    };
    let progress = Arc::new(ProgressStore::load(config.progress_path()).await);
    let index = Arc::new(MetadataIndex::load(config.metadata_index_path()).await);
    let (handle, signal) = shutdown::channel();
    handle.listen_for_ctrl_c();

    let orchestrator = TranscriptionOrchestrator::new(
        config,
        gateway,
        Arc::new(HttpAudioFetcher::new()),
        progress,
        index,
        signal,
    );

    match orchestrator.run(&JsonManifestFeed::new(feed)).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(rendered) => println!("{rendered}"),
                Err(err) => tracing::error!(error = %err, "summary serialization failed"),
            }
            summary.exit_code()
        }
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            1
        }
    }
}

async fn seed(config: Config, input: PathBuf) -> u8 {
    let state = StateFile::load(config.quota_state_path()).await;
    let gateway = match build_gateway(&config, state) {
        Ok(gateway) => gateway,
        Err(code) => return code,
    };
    let graph = Arc::new(FileGraphStore::load(config.data_dir.join("graph")).await);
    if config.graph.is_some() {
        tracing::warn!(
            "GRAPH_URI is set but no graph driver is linked; writing JSON under DATA_DIR/graph"
        );
    }

    let executor = SeedingExecutor::new(config, gateway, graph.clone());
    match executor.seed_path(&input).await {
        Ok(reports) => {
            if let Err(err) = graph.persist().await {
                eprintln!("failed to persist graph output: {err}");
                return 1;
            }
            match serde_json::to_string_pretty(&reports) {
                Ok(rendered) => println!("{rendered}"),
                Err(err) => tracing::error!(error = %err, "report serialization failed"),
            }
            0
        }
        Err(SeedingError::Gateway(podweave::gateway::GatewayError::QuotaExhausted)) => {
            eprintln!("daily quota exhausted; re-run after the local-midnight reset");
            2
        }
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            1
        }
    }
}
