//! Environment-driven configuration.
//!
//! All recognized options are read once into an explicit [`Config`] value via
//! [`Config::from_env`]; nothing in the crate reads the environment after
//! startup. `.env` files are honored through `dotenvy`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Per-key quota limits enforced by the quota tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaLimits {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub tokens_per_day: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 5,
            requests_per_day: 25,
            tokens_per_day: 1_000_000,
        }
    }
}

/// Coverage validation and continuation-loop settings.
#[derive(Clone, Copy, Debug)]
pub struct CoverageSettings {
    /// Minimum acceptable `last cue end / declared duration` ratio.
    pub min_ratio: f64,
    /// Upper bound on continuation requests per episode.
    pub max_continuations: u32,
    /// How far before the current coverage end a continuation request starts.
    pub request_overlap_seconds: f64,
    /// Dedup window when stitching overlapping transcript segments.
    pub stitch_overlap_seconds: f64,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            min_ratio: 0.85,
            max_continuations: 3,
            request_overlap_seconds: 10.0,
            stitch_overlap_seconds: 3.0,
        }
    }
}

/// Circuit breaker cool-down settings.
#[derive(Clone, Copy, Debug)]
pub struct CircuitSettings {
    pub initial_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            initial_cooldown: Duration::from_secs(30 * 60),
            max_cooldown: Duration::from_secs(120 * 60),
        }
    }
}

/// Operation-level timeouts for remote model calls.
#[derive(Clone, Copy, Debug)]
pub struct OperationTimeouts {
    pub transcription: Duration,
    pub continuation: Duration,
    pub speaker_identification: Duration,
    pub extraction: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            transcription: Duration::from_secs(600),
            continuation: Duration::from_secs(600),
            speaker_identification: Duration::from_secs(120),
            extraction: Duration::from_secs(120),
        }
    }
}

/// Model sidecar endpoint settings for the bundled HTTP provider.
#[derive(Clone, Debug, Default)]
pub struct ModelSettings {
    pub endpoint: Option<String>,
    pub name: Option<String>,
}

/// Property-graph store connection parameters.
#[derive(Clone, Debug)]
pub struct GraphConnection {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

/// One API key with its stable index in the key list.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: usize,
    pub secret: String,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secrets.
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Complete runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_keys: Vec<ApiKey>,
    pub output_dir: PathBuf,
    pub data_dir: PathBuf,
    pub max_episodes_per_run: usize,
    pub quota: QuotaLimits,
    pub coverage: CoverageSettings,
    pub circuit: CircuitSettings,
    pub timeouts: OperationTimeouts,
    pub resume: bool,
    pub model: ModelSettings,
    pub graph: Option<GraphConnection>,
}

/// Errors raised while assembling [`Config`] from the environment.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("no API keys configured")]
    #[diagnostic(
        code(podweave::config::no_api_keys),
        help("Set at least API_KEY_1 in the environment or a .env file.")
    )]
    NoApiKeys,

    #[error("invalid value for {var}: {value}")]
    #[diagnostic(
        code(podweave::config::invalid_value),
        help("Check the format of {var}; see the configuration docs for expected types.")
    )]
    InvalidValue { var: &'static str, value: String },

    #[error("incomplete graph connection: {missing} is unset")]
    #[diagnostic(
        code(podweave::config::graph_incomplete),
        help("GRAPH_URI, GRAPH_USER and GRAPH_PASSWORD must all be set together.")
    )]
    GraphIncomplete { missing: &'static str },
}

impl Config {
    /// Assemble configuration from the process environment.
    ///
    /// `API_KEY_1 .. API_KEY_N` are collected in order until the first gap;
    /// at least one key is required. Every numeric option falls back to its
    /// documented default when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut api_keys = Vec::new();
        for n in 1.. {
            match std::env::var(format!("API_KEY_{n}")) {
                Ok(secret) if !secret.trim().is_empty() => api_keys.push(ApiKey {
                    id: api_keys.len(),
                    secret,
                }),
                _ => break,
            }
        }
        if api_keys.is_empty() {
            return Err(ConfigError::NoApiKeys);
        }

        let output_dir = env_path("OUTPUT_DIR", "output");
        let data_dir = env_path("DATA_DIR", "data");

        let quota = QuotaLimits {
            requests_per_minute: env_parse("REQUESTS_PER_MINUTE_PER_KEY", 5)?,
            requests_per_day: env_parse("DAILY_REQUESTS_PER_KEY", 25)?,
            tokens_per_day: env_parse("TOKENS_PER_DAY_PER_KEY", 1_000_000)?,
        };

        let coverage = CoverageSettings {
            min_ratio: env_parse("COVERAGE_MIN_RATIO", 0.85)?,
            max_continuations: env_parse("MAX_CONTINUATIONS", 3)?,
            request_overlap_seconds: env_parse("OVERLAP_SECONDS", 10.0)?,
            stitch_overlap_seconds: env_parse("STITCH_OVERLAP_SECONDS", 3.0)?,
        };

        let circuit = CircuitSettings {
            initial_cooldown: Duration::from_secs(
                env_parse::<u64>("CIRCUIT_INITIAL_COOLDOWN_MINUTES", 30)? * 60,
            ),
            max_cooldown: Duration::from_secs(
                env_parse::<u64>("CIRCUIT_MAX_COOLDOWN_MINUTES", 120)? * 60,
            ),
        };

        let graph = match std::env::var("GRAPH_URI") {
            Ok(uri) if !uri.is_empty() => Some(GraphConnection {
                uri,
                user: std::env::var("GRAPH_USER")
                    .map_err(|_| ConfigError::GraphIncomplete { missing: "GRAPH_USER" })?,
                password: std::env::var("GRAPH_PASSWORD")
                    .map_err(|_| ConfigError::GraphIncomplete { missing: "GRAPH_PASSWORD" })?,
                database: std::env::var("GRAPH_DATABASE").ok(),
            }),
            _ => None,
        };

        Ok(Self {
            api_keys,
            output_dir,
            data_dir,
            max_episodes_per_run: env_parse("MAX_EPISODES_PER_RUN", 10)?,
            quota,
            coverage,
            circuit,
            timeouts: OperationTimeouts::default(),
            resume: env_bool("RESUME"),
            model: ModelSettings {
                endpoint: std::env::var("MODEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
                name: std::env::var("MODEL_NAME").ok().filter(|s| !s.is_empty()),
            },
            graph,
        })
    }

    /// Construct a configuration for tests and embedders, with defaults for
    /// everything except keys and directories.
    pub fn for_paths(
        api_keys: Vec<ApiKey>,
        output_dir: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_keys,
            output_dir: output_dir.into(),
            data_dir: data_dir.into(),
            max_episodes_per_run: 10,
            quota: QuotaLimits::default(),
            coverage: CoverageSettings::default(),
            circuit: CircuitSettings::default(),
            timeouts: OperationTimeouts::default(),
            resume: false,
            model: ModelSettings::default(),
            graph: None,
        }
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join(".progress.json")
    }

    pub fn quota_state_path(&self) -> PathBuf {
        self.data_dir.join(".quota_state.json")
    }

    pub fn metadata_index_path(&self) -> PathBuf {
        self.data_dir.join(".metadata_index.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| Path::new(default).to_path_buf())
}

fn env_bool(var: &str) -> bool {
    matches!(
        std::env::var(var).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(default),
    }
}
