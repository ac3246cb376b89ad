use crate::errors::DashError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type EnvMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
    pub namespace: Option<String>,
    pub kubectl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub watch: WatchConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    pub kubectl: String,
    pub kubeconfig: Option<PathBuf>,
    pub namespace: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    pub resync_seconds: u64,
    pub reconnect_backoff_seconds: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayConfig {
    pub tick_seconds: u64,
    pub unset_timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                kubectl: "kubectl".to_string(),
                kubeconfig: None,
                namespace: "argo".to_string(),
                request_timeout_seconds: 10,
            },
            watch: WatchConfig {
                resync_seconds: 30,
                reconnect_backoff_seconds: 2,
                queue_capacity: 256,
            },
            display: DisplayConfig {
                tick_seconds: 1,
                unset_timestamp: "-".to_string(),
            },
            logging: LoggingConfig {
                path: None,
                budget_bytes: crate::logging::DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    cluster: Option<PartialClusterConfig>,
    watch: Option<PartialWatchConfig>,
    display: Option<PartialDisplayConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialClusterConfig {
    kubectl: Option<String>,
    kubeconfig: Option<PathBuf>,
    namespace: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialWatchConfig {
    resync_seconds: Option<u64>,
    reconnect_backoff_seconds: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialDisplayConfig {
    tick_seconds: Option<u64>,
    unset_timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the TOML file, then CLI flags, then `$HOME`-derived fallbacks.
pub fn load_config(
    overrides: &CliOverrides,
    env: &EnvMap,
    fs: &dyn FileSystem,
) -> Result<AppConfig, DashError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| DashError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    apply_home_defaults(&mut cfg, env, fs);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(cluster) = partial.cluster {
        if let Some(value) = cluster.kubectl {
            cfg.cluster.kubectl = value;
        }
        if let Some(value) = cluster.kubeconfig {
            cfg.cluster.kubeconfig = Some(value);
        }
        if let Some(value) = cluster.namespace {
            cfg.cluster.namespace = value;
        }
        if let Some(value) = cluster.request_timeout_seconds {
            cfg.cluster.request_timeout_seconds = value;
        }
    }

    if let Some(watch) = partial.watch {
        if let Some(value) = watch.resync_seconds {
            cfg.watch.resync_seconds = value;
        }
        if let Some(value) = watch.reconnect_backoff_seconds {
            cfg.watch.reconnect_backoff_seconds = value;
        }
        if let Some(value) = watch.queue_capacity {
            cfg.watch.queue_capacity = value;
        }
    }

    if let Some(display) = partial.display {
        if let Some(value) = display.tick_seconds {
            cfg.display.tick_seconds = value;
        }
        if let Some(value) = display.unset_timestamp {
            cfg.display.unset_timestamp = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = Some(value);
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(kubeconfig) = &overrides.kubeconfig {
        cfg.cluster.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(namespace) = &overrides.namespace {
        cfg.cluster.namespace = namespace.clone();
    }
    if let Some(kubectl) = &overrides.kubectl {
        cfg.cluster.kubectl = kubectl.clone();
    }
}

fn apply_home_defaults(cfg: &mut AppConfig, env: &EnvMap, fs: &dyn FileSystem) {
    let Some(home) = env.get("HOME").filter(|home| !home.is_empty()) else {
        return;
    };
    let home = Path::new(home);
    if cfg.cluster.kubeconfig.is_none() {
        let candidate = home.join(".kube").join("config");
        if fs.exists(&candidate) {
            cfg.cluster.kubeconfig = Some(candidate);
        }
    }
    if cfg.logging.path.is_none() {
        cfg.logging.path = Some(home.join(".cache").join("wfdash").join("run.jsonl"));
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), DashError> {
    if cfg.cluster.namespace.trim().is_empty() {
        return Err(DashError::InvalidConfig(
            "cluster.namespace must not be empty".to_string(),
        ));
    }
    if cfg.cluster.kubectl.trim().is_empty() {
        return Err(DashError::InvalidConfig(
            "cluster.kubectl must not be empty".to_string(),
        ));
    }
    if cfg.watch.resync_seconds == 0 {
        return Err(DashError::InvalidConfig(
            "watch.resync_seconds must be greater than zero".to_string(),
        ));
    }
    if cfg.watch.reconnect_backoff_seconds == 0 {
        return Err(DashError::InvalidConfig(
            "watch.reconnect_backoff_seconds must be greater than zero".to_string(),
        ));
    }
    if cfg.watch.queue_capacity == 0 {
        return Err(DashError::InvalidConfig(
            "watch.queue_capacity must be greater than zero".to_string(),
        ));
    }
    if cfg.display.tick_seconds == 0 {
        return Err(DashError::InvalidConfig(
            "display.tick_seconds must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
