//! Reverting a failed release
//!
//! Every resource applied by the failing release is put back the way the last
//! successful release left it:
//! - present in the cached state, with a native rollout: rollout undo
//! - present in the cached state otherwise: re-apply the cached manifest
//! - absent from a non-empty cached state: delete it
//! - absent from an empty cached state (first release): leave it alone
//!
//! Errors are collected per resource so one failure never stops the rest.

use tracing::Instrument;
use tuber_core::{ManagedResource, ResourceRef};

use crate::cluster::ClusterClient;
use crate::error::{ReleaseError, Result};
use crate::manifest::RenderedResource;

/// What a rollback did
#[derive(Debug, Default)]
pub struct RollbackOutcome {
    /// Resources reverted to their cached version, in apply order
    pub reverted: Vec<RenderedResource>,
    /// New resources removed
    pub deleted: Vec<ResourceRef>,
    pub errors: Vec<ReleaseError>,
}

impl RollbackOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Rollback<'a> {
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
    cached: &'a [ManagedResource],
}

impl<'a> Rollback<'a> {
    pub fn new(
        cluster: &'a dyn ClusterClient,
        namespace: &'a str,
        cached: &'a [ManagedResource],
    ) -> Self {
        Self {
            cluster,
            namespace,
            cached,
        }
    }

    /// Revert `applied` in order
    pub async fn run(&self, applied: &[RenderedResource]) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();
        let first_release = self.cached.is_empty();

        for resource in applied {
            let span = tracing::info_span!(
                "rollback",
                resource_kind = %resource.kind,
                resource_name = %resource.name
            );
            let resource_ref = resource.resource_ref();
            let cached = self
                .cached
                .iter()
                .find(|c| c.kind == resource.kind && c.name == resource.name);

            match cached {
                Some(cached) => match self.revert(resource, cached).instrument(span.clone()).await {
                    Ok(()) => outcome.reverted.push(resource.clone()),
                    Err(e) => outcome
                        .errors
                        .push(span.in_scope(|| ReleaseError::rollback(resource_ref, e))),
                },
                None if first_release => {
                    span.in_scope(|| tracing::debug!("first release, leaving new resource in place"));
                }
                None => {
                    let deleted = self
                        .cluster
                        .delete(&resource.kind, &resource.name, self.namespace)
                        .instrument(span.clone())
                        .await;
                    match deleted {
                        Ok(()) => outcome.deleted.push(resource_ref),
                        Err(e) if e.is_not_found() => outcome.deleted.push(resource_ref),
                        Err(e) => outcome
                            .errors
                            .push(span.in_scope(|| ReleaseError::delete_new(resource_ref, e))),
                    }
                }
            }
        }

        tracing::info!(
            reverted = outcome.reverted.len(),
            deleted = outcome.deleted.len(),
            errors = outcome.errors.len(),
            "rollback finished"
        );
        outcome
    }

    async fn revert(&self, resource: &RenderedResource, cached: &ManagedResource) -> Result<()> {
        if resource.supports_rollback() {
            tracing::debug!("undoing rollout");
            self.cluster
                .rollout_undo(&resource.kind, &resource.name, self.namespace)
                .await
        } else {
            tracing::debug!("re-applying cached manifest");
            let manifest = cached.manifest()?;
            self.cluster.apply(&manifest, self.namespace).await
        }
    }
}
