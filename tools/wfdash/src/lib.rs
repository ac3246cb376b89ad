pub mod app;
pub mod config;
pub mod controller;
pub mod errors;
pub mod hotkeys;
pub mod kube;
pub mod log_retention;
pub mod logging;
pub mod projector;
pub mod runtime;
pub mod store;
pub mod tui;
pub mod types;
pub mod watch;

use clap::{error::ErrorKind, Parser};
use config::{load_config, CliOverrides, EnvMap};
use errors::DashError;
use logging::{append_run_log, init_run_log, JsonlLogger};
use runtime::ProductionRuntime;
use serde_json::json;

#[derive(Debug, Clone, Parser)]
#[command(name = "wfdash")]
#[command(version)]
#[command(about = "Live terminal dashboard of Argo workflows in one namespace")]
pub struct Cli {
    /// Optional TOML configuration file.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    /// Defaults to $HOME/.kube/config when that file exists.
    #[arg(long)]
    pub kubeconfig: Option<std::path::PathBuf>,
    #[arg(short, long)]
    pub namespace: Option<String>,
    /// kubectl executable used to list and watch workflows.
    #[arg(long)]
    pub kubectl: Option<String>,
}

pub fn run() -> Result<i32, DashError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &[(std::ffi::OsString, std::ffi::OsString)],
    runtime: &ProductionRuntime,
) -> Result<i32, DashError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(DashError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config,
        kubeconfig: cli.kubeconfig,
        namespace: cli.namespace,
        kubectl: cli.kubectl,
    };
    let cfg = load_config(
        &overrides,
        &env_to_map(env),
        runtime.file_system.as_ref(),
    )?;

    if !runtime.terminal.stdout_is_tty() {
        return Err(DashError::Cli(
            "wfdash requires an interactive terminal".to_string(),
        ));
    }

    if let Some(path) = &cfg.logging.path {
        let mut logger = JsonlLogger::new(path);
        logger.budget_bytes = cfg.logging.budget_bytes;
        init_run_log(logger);
    }
    append_run_log(
        "info",
        "dashboard.starting",
        json!({
            "namespace": cfg.cluster.namespace,
            "kubectl": cfg.cluster.kubectl,
            "kubeconfig": cfg.cluster.kubeconfig,
        }),
    );

    app::run_dashboard(runtime, &cfg)?;
    Ok(0)
}

fn env_to_map(env: &[(std::ffi::OsString, std::ffi::OsString)]) -> EnvMap {
    let mut map = EnvMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}
