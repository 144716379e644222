//! CLI commands

pub mod apps;
pub mod release;
pub mod render;

use std::path::Path;
use std::sync::Arc;

use tuber_core::{ClusterClientConfig, StoreConfig, TuberConfig};
use tuber_kube::{
    ApiClusterClient, AppStore, ClusterClient, ConfigMapStore, FileStore, KubectlClient,
};

use crate::error::{CliError, Result};

/// Configuration plus the backends it selects
pub struct Context {
    pub config: TuberConfig,
}

impl Context {
    /// Load from `path`, or from `$TUBER_CONFIG` / the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let mut config = TuberConfig::load_from(path).map_err(|e| CliError::Config {
                    message: format!("{}: {}", path.display(), e),
                    help: None,
                })?;
                config.apply_env_overrides();
                config
            }
            None => TuberConfig::load()?,
        };
        tracing::debug!(control_namespace = %config.control_namespace, "configuration loaded");
        Ok(Self { config })
    }

    pub async fn store(&self) -> Result<Arc<dyn AppStore>> {
        match &self.config.store {
            StoreConfig::File { dir } => Ok(Arc::new(FileStore::new(dir)?)),
            StoreConfig::ConfigMap { name } => {
                let store = ConfigMapStore::new(self.config.control_namespace.clone(), name.clone())
                    .await
                    .map_err(|e| CliError::Store {
                        message: e.to_string(),
                        help: Some("is a kubeconfig available for the cluster?".to_string()),
                    })?;
                Ok(Arc::new(store))
            }
        }
    }

    pub async fn cluster(&self) -> Result<Arc<dyn ClusterClient>> {
        match &self.config.cluster_client {
            ClusterClientConfig::Kubectl { context, binary } => Ok(Arc::new(
                KubectlClient::new(binary).with_context(context.clone()),
            )),
            ClusterClientConfig::Api => {
                let client = ApiClusterClient::try_default()
                    .await
                    .map_err(|e| CliError::config(format!("cannot connect to the cluster: {}", e)))?;
                Ok(Arc::new(client))
            }
        }
    }
}
