//! Application records
//!
//! An [`App`] is everything Tuber knows about one deployed application: where its
//! image comes from, the variables its manifests are interpolated with, which
//! resources it must never touch, and the last two successfully released
//! resource sets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::state::State;

/// Interpolation key for the released image digest
pub const VAR_IMAGE: &str = "tuberImage";
/// Interpolation key for the app name
pub const VAR_APP_NAME: &str = "tuberAppName";
pub const VAR_DEFAULT_GATEWAY: &str = "clusterDefaultGateway";
pub const VAR_DEFAULT_HOST: &str = "clusterDefaultHost";
pub const VAR_ADMIN_GATEWAY: &str = "clusterAdminGateway";
pub const VAR_ADMIN_HOST: &str = "clusterAdminHost";

/// A Tuber-managed application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    /// App name, also the namespace it is released into
    pub name: String,

    /// Image reference releases are triggered from (e.g. `gcr.io/proj/app:main`)
    #[serde(default)]
    pub image_tag: String,

    /// Per-app interpolation variables
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Resources that are never applied or recorded for this app
    #[serde(default)]
    pub excluded_resources: Vec<ResourceRef>,

    /// Notification channel (catch-all channel when empty)
    #[serde(default)]
    pub slack_channel: String,

    /// Paused apps are skipped by the releaser
    #[serde(default)]
    pub paused: bool,

    /// Review apps skip external monitoring
    #[serde(default)]
    pub review_app: bool,

    /// Image tags of the currently released digest
    #[serde(default)]
    pub current_tags: Vec<String>,

    /// Last two released resource sets
    #[serde(default)]
    pub state: State,

    /// When `state` was last written
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

impl App {
    pub fn new(name: impl Into<String>, image_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_tag: image_tag.into(),
            ..Default::default()
        }
    }

    /// Channel to notify, if the app configured one
    pub fn channel(&self) -> Option<&str> {
        if self.slack_channel.is_empty() {
            None
        } else {
            Some(&self.slack_channel)
        }
    }

    /// Add an exclusion unless an identical one is already present
    pub fn exclude(&mut self, resource: ResourceRef) -> bool {
        if self.excluded_resources.contains(&resource) {
            return false;
        }
        self.excluded_resources.push(resource);
        true
    }

    /// Build the interpolation variables for releasing `digest`
    ///
    /// App vars are inserted first so the built-in keys always win.
    pub fn interpolation_vars(
        &self,
        digest: &str,
        cluster: &ClusterData,
    ) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert(VAR_IMAGE.to_string(), digest.to_string());
        vars.insert(VAR_APP_NAME.to_string(), self.name.clone());
        vars.insert(
            VAR_DEFAULT_GATEWAY.to_string(),
            cluster.default_gateway.clone(),
        );
        vars.insert(VAR_DEFAULT_HOST.to_string(), cluster.default_host.clone());
        vars.insert(VAR_ADMIN_GATEWAY.to_string(), cluster.admin_gateway.clone());
        vars.insert(VAR_ADMIN_HOST.to_string(), cluster.admin_host.clone());
        vars
    }
}

/// Cluster-wide values available to every app's manifests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterData {
    #[serde(default)]
    pub default_gateway: String,
    #[serde(default)]
    pub default_host: String,
    #[serde(default)]
    pub admin_gateway: String,
    #[serde(default)]
    pub admin_host: String,
}

/// Reference to a Kubernetes resource by kind and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive identity used for exclusion matching
    pub fn exclusion_key(&self) -> String {
        format!("{}:{}", self.kind.to_lowercase(), self.name.to_lowercase())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = CoreError;

    /// Parse `Kind/name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(ResourceRef::new(kind, name))
            }
            _ => Err(CoreError::InvalidResourceRef {
                value: s.to_string(),
            }),
        }
    }
}

/// Raw manifest groups extracted for one image digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppYamls {
    /// Run-to-completion Pods applied before anything else
    pub prerelease: Vec<String>,
    /// Main release manifests (configs and workloads)
    pub release: Vec<String>,
    /// Canary-stage manifests applied after the workloads are healthy
    pub postrelease: Vec<String>,
    /// Image tags pointing at the digest
    pub tags: Vec<String>,
}
