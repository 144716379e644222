//! Cluster operations used by a release
//!
//! The release pipeline only needs five operations against one namespace. Two
//! backends implement them:
//! - **kubectl**: shells out to the `kubectl` binary
//! - **api**: talks to the API server through `kube`
//!
//! [`MockCluster`] keeps everything in memory for tests.

mod api;
mod kubectl;
mod mock;

pub use api::ApiClusterClient;
pub use kubectl::KubectlClient;
pub use mock::{ClusterCall, MockCluster, MockOp};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Cluster command execution for one namespace at a time
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update the object described by `manifest`
    async fn apply(&self, manifest: &str, namespace: &str) -> Result<()>;

    /// Live object as JSON; a missing object is a "not found" error
    async fn get(&self, kind: &str, name: &str, namespace: &str) -> Result<serde_json::Value>;

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()>;

    /// Wait until the workload's rollout completes or `timeout` elapses
    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Roll the workload back to its previous revision
    async fn rollout_undo(&self, kind: &str, name: &str, namespace: &str) -> Result<()>;
}

#[async_trait]
impl<T: ClusterClient + ?Sized> ClusterClient for Arc<T> {
    async fn apply(&self, manifest: &str, namespace: &str) -> Result<()> {
        (**self).apply(manifest, namespace).await
    }

    async fn get(&self, kind: &str, name: &str, namespace: &str) -> Result<serde_json::Value> {
        (**self).get(kind, name, namespace).await
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        (**self).delete(kind, name, namespace).await
    }

    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        (**self).rollout_status(kind, name, namespace, timeout).await
    }

    async fn rollout_undo(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        (**self).rollout_undo(kind, name, namespace).await
    }
}

/// Whether a live object is owned (and garbage collected) by another object
pub fn has_owner_references(object: &serde_json::Value) -> bool {
    object
        .pointer("/metadata/ownerReferences")
        .and_then(|v| v.as_array())
        .is_some_and(|refs| !refs.is_empty())
}
