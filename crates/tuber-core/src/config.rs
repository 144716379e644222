//! Tuber configuration
//!
//! Loaded from `~/.config/tuber/config.yaml` unless a path is given explicitly.
//! Every section has defaults, so an empty file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::ClusterData;
use crate::error::{CoreError, Result};

/// Environment variable that points at an alternative config file
pub const CONFIG_ENV: &str = "TUBER_CONFIG";

const ENV_DEFAULT_GATEWAY: &str = "TUBER_CLUSTER_DEFAULT_GATEWAY";
const ENV_DEFAULT_HOST: &str = "TUBER_CLUSTER_DEFAULT_HOST";
const ENV_ADMIN_GATEWAY: &str = "TUBER_CLUSTER_ADMIN_GATEWAY";
const ENV_ADMIN_HOST: &str = "TUBER_CLUSTER_ADMIN_HOST";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuberConfig {
    /// Namespace Tuber itself runs in
    #[serde(default = "default_control_namespace")]
    pub control_namespace: String,

    #[serde(default)]
    pub cluster: ClusterData,

    #[serde(default)]
    pub timings: ReleaseTimings,

    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cluster_client: ClusterClientConfig,
}

fn default_control_namespace() -> String {
    "tuber".to_string()
}

impl Default for TuberConfig {
    fn default() -> Self {
        Self {
            control_namespace: default_control_namespace(),
            cluster: ClusterData::default(),
            timings: ReleaseTimings::default(),
            slack: SlackConfig::default(),
            monitor: MonitorConfig::default(),
            store: StoreConfig::default(),
            cluster_client: ClusterClientConfig::default(),
        }
    }
}

impl TuberConfig {
    /// Load from `$TUBER_CONFIG` or the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::default_path()?,
        };
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("tuber").join("config.yaml"))
    }

    /// Override cluster data from `TUBER_CLUSTER_*` variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets = [
            (ENV_DEFAULT_GATEWAY, &mut self.cluster.default_gateway),
            (ENV_DEFAULT_HOST, &mut self.cluster.default_host),
            (ENV_ADMIN_GATEWAY, &mut self.cluster.admin_gateway),
            (ENV_ADMIN_HOST, &mut self.cluster.admin_host),
        ];
        for (key, field) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.control_namespace.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                message: "controlNamespace must not be empty".to_string(),
            });
        }
        if self.timings.prerelease_poll.is_zero() || self.timings.monitor_interval.is_zero() {
            return Err(CoreError::InvalidConfig {
                message: "poll intervals must be greater than zero".to_string(),
            });
        }
        if self.slack.enabled && self.slack.token.is_empty() {
            return Err(CoreError::InvalidConfig {
                message: "slack.token is required when slack is enabled".to_string(),
            });
        }
        Ok(())
    }
}

/// Default timeouts and poll intervals used by the releaser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseTimings {
    #[serde(default = "default_prerelease_timeout", with = "humantime_serde")]
    pub prerelease_timeout: Duration,

    #[serde(default = "default_prerelease_poll", with = "humantime_serde")]
    pub prerelease_poll: Duration,

    #[serde(default = "default_rollout_timeout", with = "humantime_serde")]
    pub rollout_timeout: Duration,

    #[serde(default = "default_rollout_timeout", with = "humantime_serde")]
    pub rollback_timeout: Duration,

    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,
}

fn default_prerelease_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_prerelease_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_rollout_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for ReleaseTimings {
    fn default() -> Self {
        Self {
            prerelease_timeout: default_prerelease_timeout(),
            prerelease_poll: default_prerelease_poll(),
            rollout_timeout: default_rollout_timeout(),
            rollback_timeout: default_rollout_timeout(),
            monitor_interval: default_monitor_interval(),
        }
    }
}

/// Slack delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Bot token used for `chat.postMessage`
    #[serde(default)]
    pub token: String,

    /// Channel for apps without their own
    #[serde(default = "default_catch_all_channel")]
    pub catch_all_channel: String,

    #[serde(default = "default_slack_api_url")]
    pub api_url: String,
}

fn default_catch_all_channel() -> String {
    "#tuber".to_string()
}

fn default_slack_api_url() -> String {
    "https://slack.com/api".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            catch_all_channel: default_catch_all_channel(),
            api_url: default_slack_api_url(),
        }
    }
}

/// External monitor settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Credential sent to the monitor
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Where app records are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StoreConfig {
    /// One ConfigMap per app in the control namespace, named `<name>-<app>`
    ConfigMap {
        #[serde(default = "default_store_name")]
        name: String,
    },
    /// One JSON file per app
    File { dir: PathBuf },
}

fn default_store_name() -> String {
    "tuber-apps".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::ConfigMap {
            name: default_store_name(),
        }
    }
}

/// How cluster operations are executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ClusterClientConfig {
    /// Shell out to kubectl
    Kubectl {
        #[serde(default)]
        context: Option<String>,
        #[serde(default = "default_kubectl_binary")]
        binary: PathBuf,
    },
    /// Talk to the API server directly
    Api,
}

fn default_kubectl_binary() -> PathBuf {
    PathBuf::from("kubectl")
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        ClusterClientConfig::Kubectl {
            context: None,
            binary: default_kubectl_binary(),
        }
    }
}
