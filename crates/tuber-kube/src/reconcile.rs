//! Post-release cleanup and state persistence

use chrono::Utc;
use tracing::Instrument;
use tuber_core::{App, ManagedResource, ResourceRef};

use crate::cluster::{ClusterClient, has_owner_references};
use crate::error::{ReleaseError, Result};
use crate::store::AppStore;

/// Result of removing resources dropped from an app's manifests
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub removed: Vec<ResourceRef>,
    pub errors: Vec<ReleaseError>,
}

pub struct Reconciler<'a> {
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, namespace: &'a str) -> Self {
        Self { cluster, namespace }
    }

    /// Delete resources from `cached` that are not in `released`
    ///
    /// Objects owned by another object are left to Kubernetes garbage
    /// collection. Objects already gone are skipped.
    pub async fn cleanup(
        &self,
        cached: &[ManagedResource],
        released: &[ManagedResource],
    ) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();

        for stale in cached
            .iter()
            .filter(|c| !released.iter().any(|r| r.same_object(c)))
        {
            let resource = stale.resource_ref();
            let span = tracing::info_span!(
                "cleanup",
                resource_kind = %stale.kind,
                resource_name = %stale.name
            );
            match self.remove(stale).instrument(span.clone()).await {
                Ok(true) => outcome.removed.push(resource),
                Ok(false) => {}
                Err(e) => outcome
                    .errors
                    .push(span.in_scope(|| ReleaseError::cleanup(resource, e))),
            }
        }

        outcome
    }

    async fn remove(&self, stale: &ManagedResource) -> Result<bool> {
        let live = match self.cluster.get(&stale.kind, &stale.name, self.namespace).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                tracing::debug!("already gone");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if has_owner_references(&live) {
            tracing::debug!("owned by another object, leaving to garbage collection");
            return Ok(false);
        }

        match self
            .cluster
            .delete(&stale.kind, &stale.name, self.namespace)
            .await
        {
            Ok(()) => {
                tracing::info!("removed resource no longer in manifests");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Record `released` as the app's current state
///
/// The app is re-read first so concurrent edits to other fields survive.
pub async fn persist_state(
    store: &dyn AppStore,
    app_name: &str,
    released: Vec<ManagedResource>,
    tags: Vec<String>,
) -> std::result::Result<App, ReleaseError> {
    let mut app = store
        .get(app_name)
        .await
        .map_err(ReleaseError::persist_state)?;

    app.state.advance(released);
    app.current_tags = tags;
    app.released_at = Some(Utc::now());

    store
        .save(&app)
        .await
        .map_err(ReleaseError::persist_state)?;
    tracing::debug!(resources = app.state.current.len(), "persisted release state");
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockCluster, MockOp};
    use crate::error::Stage;
    use crate::store::MockAppStore;

    fn managed(kind: &str, name: &str) -> ManagedResource {
        ManagedResource::new(
            kind,
            name,
            &format!("apiVersion: v1\nkind: {}\nmetadata:\n  name: {}\n", kind, name),
        )
    }

    #[tokio::test]
    async fn test_cleanup_removes_unowned_stale_resources() {
        let cluster = MockCluster::new();
        let cached = vec![
            managed("ConfigMap", "keep"),
            managed("ConfigMap", "stale"),
            managed("Service", "owned"),
            managed("Service", "gone"),
        ];
        for m in &cached[..3] {
            cluster.insert_object("shop", &m.manifest().unwrap()).unwrap();
        }
        cluster.set_owned("Service", "owned");

        let released = vec![managed("ConfigMap", "keep")];
        let outcome = Reconciler::new(&cluster, "shop")
            .cleanup(&cached, &released)
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.removed, vec![ResourceRef::new("ConfigMap", "stale")]);
        assert_eq!(cluster.deleted(), vec![ResourceRef::new("ConfigMap", "stale")]);
        assert!(cluster.has_object("shop", "Service", "owned"));
    }

    #[tokio::test]
    async fn test_cleanup_errors_are_collected() {
        let cluster = MockCluster::new();
        let cached = vec![managed("ConfigMap", "a"), managed("ConfigMap", "b")];
        for m in &cached {
            cluster.insert_object("shop", &m.manifest().unwrap()).unwrap();
        }
        cluster.fail(MockOp::Delete, "ConfigMap", "a", "forbidden");

        let outcome = Reconciler::new(&cluster, "shop").cleanup(&cached, &[]).await;
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].stage, Stage::Cleanup);
        assert_eq!(outcome.removed, vec![ResourceRef::new("ConfigMap", "b")]);
    }

    #[tokio::test]
    async fn test_persist_shifts_state() {
        let mut app = App::new("shop", "");
        app.state.current = vec![managed("ConfigMap", "v1")];
        app.state.previous = vec![managed("ConfigMap", "v0")];
        let store = MockAppStore::with_apps([app]);

        let saved = persist_state(
            &store,
            "shop",
            vec![managed("ConfigMap", "v2")],
            vec!["main".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(saved.state.previous, vec![managed("ConfigMap", "v1")]);
        assert_eq!(saved.state.current, vec![managed("ConfigMap", "v2")]);
        assert_eq!(saved.current_tags, vec!["main"]);
        assert!(saved.released_at.is_some());
        assert_eq!(store.app("shop").unwrap(), saved);
    }

    #[tokio::test]
    async fn test_persist_failure_is_rollback_unsafe() {
        let store = MockAppStore::with_apps([App::new("shop", "")]);
        store.fail_saves("etcd unavailable");

        let err = persist_state(&store, "shop", vec![], vec![]).await.unwrap_err();
        assert!(err.stage.is_rollback_unsafe());
    }
}
