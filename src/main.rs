mod app;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;
use tracing_subscriber::EnvFilter;

use app::cli;
use task_status_sync::manager::session::SessionScope;
use task_status_sync::transport::change_feed::OfflineRealtime;
use task_status_sync::transport::http::ApiClient;
use task_status_sync::{SyncConfig, SyncDeps};

#[derive(Debug, Parser)]
#[command(name = "task-sync", version, about = "Live view of your document-processing tasks")]
struct Args {
    /// Settings file.
    #[arg(long, default_value = "task-sync.toml")]
    config: PathBuf,

    /// API root, overrides the settings file.
    #[arg(long)]
    base_url: Option<String>,

    /// Sign in as this user on start.
    #[arg(long)]
    user_id: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match SyncConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if args.user_id.is_some() {
        config.user_id = args.user_id;
    }

    let api = match ApiClient::new(&config.base_url, config.request_timeout()) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    // No realtime client ships with the terminal build; the supervisor
    // settles on the event stream.
    let deps = SyncDeps {
        fetcher: api.clone(),
        realtime: Arc::new(OfflineRealtime),
        events: api.clone(),
        actions: api,
    };

    let user_id = config.user_id.clone();
    let mut scope = SessionScope::new(deps, config);
    scope.set_user(user_id.as_deref());

    if let Err(err) = cli::run_cli(scope) {
        error!("Terminal error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
