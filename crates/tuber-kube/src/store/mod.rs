//! Durable app records
//!
//! The release pipeline only reads an app by name and saves it back. Backends:
//! - **ConfigMap** (default): one ConfigMap per app in the control namespace
//! - **File**: one JSON file per app (local development and tests)
//! - **Mock**: in memory, with operation counts and failure injection

mod configmap;
mod file;
mod mock;

pub use configmap::ConfigMapStore;
pub use file::FileStore;
pub use mock::{MockAppStore, StoreCounts};

use std::sync::Arc;

use async_trait::async_trait;
use tuber_core::App;

use crate::error::{KubeError, Result};

/// Get/save of app records by name
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait AppStore: Send + Sync {
    /// Load an app; a missing record is [`KubeError::AppNotFound`]
    async fn get(&self, name: &str) -> Result<App>;

    /// Create or replace the record for `app.name`
    async fn save(&self, app: &App) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool> {
        match self.get(name).await {
            Ok(_) => Ok(true),
            Err(KubeError::AppNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<T: AppStore + ?Sized> AppStore for Arc<T> {
    async fn get(&self, name: &str) -> Result<App> {
        (**self).get(name).await
    }

    async fn save(&self, app: &App) -> Result<()> {
        (**self).save(app).await
    }
}

pub(crate) fn encode_app(app: &App) -> Result<String> {
    Ok(serde_json::to_string(app)?)
}

pub(crate) fn decode_app(name: &str, data: &str) -> Result<App> {
    serde_json::from_str(data)
        .map_err(|e| KubeError::Storage(format!("corrupt record for app '{}': {}", name, e)))
}
