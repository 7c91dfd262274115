use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// loadscope — launches load-test, audit and SEO workers and hands their
/// results back through a polling protocol.
#[derive(Parser, Debug, Clone)]
#[command(name = "loadscope", version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the orchestration HTTP server
    Serve(ServeArgs),
    /// Submit a test configuration to a running server and wait for results
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// HTTP port
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory for the local store database (defaults to the user data dir)
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Shared directory workers write their result artifacts into
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Directory holding the load-test entry script
    #[arg(long = "scripts-dir", default_value = "scripts")]
    pub scripts_dir: PathBuf,

    /// Container runtime binary
    #[arg(long = "docker-bin", default_value = DEFAULT_DOCKER_BIN)]
    pub docker_bin: String,

    /// Load generator image
    #[arg(long = "load-image", default_value = DEFAULT_LOAD_IMAGE)]
    pub load_image: String,

    /// Audit tool image
    #[arg(long = "audit-image", default_value = DEFAULT_AUDIT_IMAGE)]
    pub audit_image: String,

    /// Reject launches once this many workers are alive (unbounded if unset)
    #[arg(long = "max-workers")]
    pub max_workers: Option<usize>,

    /// OpenAI-compatible chat completions endpoint used for SEO analysis
    #[arg(long = "seo-endpoint", default_value = DEFAULT_SEO_ENDPOINT)]
    pub seo_endpoint: String,

    /// Model name sent to the SEO endpoint
    #[arg(long = "seo-model", default_value = DEFAULT_SEO_MODEL)]
    pub seo_model: String,

    /// Also write logs to a daily-rolling file at this path
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Base URL of a running loadscope server
    #[arg(long = "server", default_value = "http://127.0.0.1:9880")]
    pub server: String,

    /// JSON file containing the test configuration
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Seconds between result checks
    #[arg(long = "interval-secs", default_value_t = POLL_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Give up after this many pending checks
    #[arg(long = "max-attempts", default_value_t = POLL_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub docker_bin: String,
    pub load_image: String,
    pub audit_image: String,
    pub max_workers: Option<usize>,
    pub seo_endpoint: String,
    pub seo_model: String,
    pub seo_api_key: Option<String>,
    pub log_file: Option<PathBuf>,
}

pub const DEFAULT_PORT: u16 = 9880;

// Worker constants
pub const DEFAULT_DOCKER_BIN: &str = "docker";
pub const DEFAULT_LOAD_IMAGE: &str = "grafana/k6:latest";
pub const DEFAULT_AUDIT_IMAGE: &str = "femtopixel/google-lighthouse:latest";
pub const WORKER_SCRIPT_PATH: &str = "/scripts/load-test.js";
pub const WORKER_SCRIPTS_MOUNT: &str = "/scripts";
pub const WORKER_OUTPUT_MOUNT: &str = "/output";
pub const WORKER_NAME_PREFIX: &str = "loadscope";

// Poller constants
pub const POLL_INTERVAL_SECS: u64 = 3;
pub const POLL_MAX_ATTEMPTS: u32 = 600; // 30 minutes at the default interval

// SEO constants
pub const DEFAULT_SEO_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_SEO_MODEL: &str = "gpt-4o-mini";
pub const SEO_API_KEY_ENV: &str = "LOADSCOPE_SEO_API_KEY";
pub const SEO_FETCH_TIMEOUT_SECS: u64 = 20;
pub const SEO_ANALYSIS_TIMEOUT_SECS: u64 = 120;
pub const SEO_MAX_HTML_CHARS: usize = 200_000;

// Ad hoc request tester
pub const REQUEST_TESTER_TIMEOUT_SECS: u64 = 30;

// Local store constants
pub const LOCAL_STORE_FILE: &str = "loadscope.db";
pub const RECENT_URLS_LIMIT: usize = 10;

// Log constants
pub const LOG_BUFFER_SIZE: usize = 500;

impl OrchestratorConfig {
    pub fn from_args(args: ServeArgs) -> Self {
        let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
        let output_dir = args
            .output_dir
            .unwrap_or_else(|| data_dir.join("results"));

        OrchestratorConfig {
            port: args.port,
            data_dir,
            output_dir,
            scripts_dir: args.scripts_dir,
            docker_bin: args.docker_bin,
            load_image: args.load_image,
            audit_image: args.audit_image,
            max_workers: args.max_workers,
            seo_endpoint: args.seo_endpoint,
            seo_model: args.seo_model,
            seo_api_key: std::env::var(SEO_API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            log_file: args.log_file,
        }
    }

    /// Path of the sqlite file backing the local store.
    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir.join(LOCAL_STORE_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("loadscope")
}
