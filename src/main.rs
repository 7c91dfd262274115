use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use loadscope::client::OrchestratorClient;
use loadscope::config::{CliArgs, Command, OrchestratorConfig, RunArgs, ServeArgs};
use loadscope::log_capture::{LogLevel, LogSource};
use loadscope::model::TestConfiguration;
use loadscope::poller::{CompletionPoller, PollerState};
use loadscope::server;
use loadscope::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let log_file = match &args.command {
        Command::Serve(serve) => serve.log_file.clone(),
        Command::Run(_) => None,
    };
    // Keep the guard alive so buffered file output is flushed on exit.
    let _log_guard = init_tracing(log_file.as_deref());

    match args.command {
        Command::Serve(serve) => run_server(serve).await,
        Command::Run(run) => run_client(run).await,
    }
}

fn init_tracing(
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "loadscope=info,tower_http=info".into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "loadscope.log".into());
    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Some(guard)
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_args(args);
    let port = config.port;

    info!("Starting loadscope v{}", env!("CARGO_PKG_VERSION"));
    info!("Data dir: {:?}", config.data_dir);
    info!("Output dir: {:?}", config.output_dir);
    info!("Scripts dir: {:?}", config.scripts_dir);
    if config.seo_api_key.is_none() {
        warn!(
            "No SEO API key set; SEO runs will report failure until it is configured"
        );
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {:?}", config.data_dir))?;
    if !config.scripts_dir.join("load-test.js").exists() {
        warn!(
            "Load-test entry script not found in {:?}; load workers will fail",
            config.scripts_dir
        );
    }

    let state: SharedState = Arc::new(AppState::new(config)?);
    let _sync_tasks = state.spawn_background();

    state
        .logs
        .emit(
            LogSource::Orchestrator,
            LogLevel::Info,
            format!("Orchestrator starting on port {}", port),
        )
        .await;

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    let remaining = state.launcher.active_count().await;
    if remaining > 0 {
        // Containers run with --rm and finish on their own.
        warn!("Shutting down with {} worker(s) still running", remaining);
    }
    info!("Orchestrator shut down");
    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Received shutdown signal");
    state
        .logs
        .emit(
            LogSource::Orchestrator,
            LogLevel::Info,
            "Shutdown signal received",
        )
        .await;
}

async fn run_client(args: RunArgs) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("reading {:?}", args.config))?;
    let config: TestConfiguration = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {:?}", args.config))?;

    let client = OrchestratorClient::new(&args.server)?;
    let submission = client.submit(&config).await?;
    info!(
        "Run {} submitted ({} artifact(s))",
        submission.run_id,
        submission.artifacts.len()
    );

    let interval = Duration::from_secs(args.interval_secs);
    let polls = submission.artifacts.iter().map(|kind| {
        let client = client.clone();
        let run_id = submission.run_id.clone();
        let kind = *kind;
        async move {
            let source = client.result(&run_id, kind)?;
            let mut poller = CompletionPoller::new(interval, args.max_attempts);
            let outcome = poller.run(&source).await;
            Ok::<_, anyhow::Error>((kind, outcome))
        }
    });

    let mut all_complete = true;
    for outcome in futures::future::join_all(polls).await {
        let (kind, state) = outcome?;
        match state {
            PollerState::Complete { result } => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "kind": kind,
                        "result": result,
                    }))?
                );
            }
            PollerState::TimedOut { attempts } => {
                error!("{} result not ready after {} checks", kind, attempts);
                all_complete = false;
            }
            PollerState::Failed { error } => {
                error!("{} result failed: {}", kind, error);
                all_complete = false;
            }
            PollerState::Idle | PollerState::Polling { .. } => all_complete = false,
        }
    }

    if !all_complete {
        std::process::exit(1);
    }
    Ok(())
}
