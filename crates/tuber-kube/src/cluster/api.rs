//! Native API-server cluster client
//!
//! - Apply uses Server-Side Apply with a forced field manager
//! - Kinds are resolved through API discovery, so any installed CRD works
//! - Rollout status polls the typed workload status
//! - Rollout undo restores the previous ReplicaSet template (Deployments) or
//!   ControllerRevision (StatefulSets, DaemonSets)

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{ControllerRevision, DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PropagationPolicy},
    core::{GroupVersionKind, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use serde_json::json;

use super::ClusterClient;
use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "tuber";

const DEPLOYMENT_REVISION: &str = "deployment.kubernetes.io/revision";
const POD_TEMPLATE_HASH: &str = "pod-template-hash";

const ROLLOUT_POLL: Duration = Duration::from_secs(2);

/// Cluster client backed by the Kubernetes API
pub struct ApiClusterClient {
    client: Client,
    discovery: Discovery,
}

enum RolloutState {
    Complete,
    Progressing(String),
    Failed(String),
}

impl ApiClusterClient {
    /// Connect using the default kubeconfig / in-cluster config
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Self::new(client).await
    }

    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self::with_discovery(client, discovery))
    }

    /// Create from existing client and discovery (for reuse)
    pub fn with_discovery(client: Client, discovery: Discovery) -> Self {
        Self { client, discovery }
    }

    /// Resolve a bare kind name through discovery
    fn resolve_kind(&self, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        self.discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .find(|(ar, _)| ar.kind.eq_ignore_ascii_case(kind))
            .ok_or_else(|| KubeError::UnknownKind(kind.to_string()))
    }

    fn dynamic_api(&self, kind: &str, namespace: &str) -> Result<Api<DynamicObject>> {
        let (resource, caps) = self.resolve_kind(kind)?;
        Ok(if caps.scope == Scope::Namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        })
    }

    async fn rollout_state(&self, kind: &str, name: &str, namespace: &str) -> Result<RolloutState> {
        let not_found = |e: kube::Error| api_error(e, kind, name, namespace);
        match kind {
            "Deployment" => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let d = api.get(name).await.map_err(not_found)?;
                Ok(deployment_state(&d))
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let s = api.get(name).await.map_err(not_found)?;
                Ok(statefulset_state(&s))
            }
            "DaemonSet" => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
                let d = api.get(name).await.map_err(not_found)?;
                Ok(daemonset_state(&d))
            }
            other => Err(KubeError::RolloutFailed {
                resource: format!("{}/{}", other, name),
                message: "kind has no rollout status".to_string(),
            }),
        }
    }

    async fn undo_deployment(&self, name: &str, namespace: &str) -> Result<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments
            .get(name)
            .await
            .map_err(|e| api_error(e, "Deployment", name, namespace))?;

        let uid = deployment.metadata.uid.clone().unwrap_or_default();
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(label_selector)
            .unwrap_or_default();

        let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = replica_sets
            .list(&ListParams::default().labels(&selector))
            .await?;

        let revisions: Vec<(i64, ReplicaSet)> = list
            .items
            .into_iter()
            .filter(|rs| owned_by(&rs.metadata, &uid))
            .filter_map(|rs| {
                let revision = rs
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(DEPLOYMENT_REVISION))
                    .and_then(|r| r.parse().ok())?;
                Some((revision, rs))
            })
            .collect();

        let previous = previous_revision(revisions).ok_or_else(|| no_previous("Deployment", name))?;
        let mut template = previous
            .spec
            .and_then(|s| s.template)
            .ok_or_else(|| no_previous("Deployment", name))?;
        if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
            labels.remove(POD_TEMPLATE_HASH);
        }

        deployments
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "spec": { "template": template } })),
            )
            .await?;
        Ok(())
    }

    async fn undo_controller_revision(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let not_found = |e: kube::Error| api_error(e, kind, name, namespace);
        let (uid, selector) = match kind {
            "StatefulSet" => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let s = api.get(name).await.map_err(not_found)?;
                let labels = s.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref()).map(label_selector);
                (s.metadata.uid, labels)
            }
            _ => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
                let d = api.get(name).await.map_err(not_found)?;
                let labels = d.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref()).map(label_selector);
                (d.metadata.uid, labels)
            }
        };
        let uid = uid.unwrap_or_default();

        let revisions_api: Api<ControllerRevision> = Api::namespaced(self.client.clone(), namespace);
        let list = revisions_api
            .list(&ListParams::default().labels(&selector.unwrap_or_default()))
            .await?;
        let revisions: Vec<(i64, ControllerRevision)> = list
            .items
            .into_iter()
            .filter(|r| owned_by(&r.metadata, &uid))
            .map(|r| (r.revision, r))
            .collect();

        let previous = previous_revision(revisions).ok_or_else(|| no_previous(kind, name))?;
        let data = previous.data.ok_or_else(|| no_previous(kind, name))?;

        let api = self.dynamic_api(kind, namespace)?;
        api.patch(name, &PatchParams::default(), &Patch::Strategic(data.0))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for ApiClusterClient {
    async fn apply(&self, manifest: &str, namespace: &str) -> Result<()> {
        let mut obj: DynamicObject = serde_yaml::from_str(manifest)?;
        let type_meta = obj
            .types
            .as_ref()
            .ok_or_else(|| KubeError::InvalidManifest("missing apiVersion or kind".to_string()))?;
        let gvk = gvk_from_type_meta(type_meta);
        let (resource, caps) = self
            .discovery
            .resolve_gvk(&gvk)
            .ok_or_else(|| KubeError::UnknownKind(format!("{}/{}", type_meta.api_version, type_meta.kind)))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("missing metadata.name".to_string()))?;

        let api: Api<DynamicObject> = if caps.scope == Scope::Namespaced {
            obj.metadata.namespace = Some(namespace.to_string());
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        };

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        api.patch(&name, &params, &Patch::Apply(&obj)).await?;
        Ok(())
    }

    async fn get(&self, kind: &str, name: &str, namespace: &str) -> Result<serde_json::Value> {
        let api = self.dynamic_api(kind, namespace)?;
        let obj = api
            .get(name)
            .await
            .map_err(|e| api_error(e, kind, name, namespace))?;
        Ok(serde_json::to_value(obj)?)
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let api = self.dynamic_api(kind, namespace)?;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        api.delete(name, &params)
            .await
            .map_err(|e| api_error(e, kind, name, namespace))?;
        Ok(())
    }

    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last = String::from("rollout not started");

        loop {
            match self.rollout_state(kind, name, namespace).await? {
                RolloutState::Complete => return Ok(()),
                RolloutState::Failed(message) => {
                    return Err(KubeError::RolloutFailed {
                        resource: format!("{}/{}", kind, name),
                        message,
                    });
                }
                RolloutState::Progressing(message) => last = message,
            }

            if tokio::time::Instant::now() + ROLLOUT_POLL > deadline {
                return Err(KubeError::RolloutFailed {
                    resource: format!("{}/{}", kind, name),
                    message: format!("timed out after {:?}: {}", timeout, last),
                });
            }
            tokio::time::sleep(ROLLOUT_POLL).await;
        }
    }

    async fn rollout_undo(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        match kind {
            "Deployment" => self.undo_deployment(name, namespace).await,
            "StatefulSet" | "DaemonSet" => self.undo_controller_revision(kind, name, namespace).await,
            other => Err(KubeError::RolloutFailed {
                resource: format!("{}/{}", other, name),
                message: "kind does not support rollback".to_string(),
            }),
        }
    }
}

fn deployment_state(d: &Deployment) -> RolloutState {
    let status = d.status.as_ref();
    let generation = d.metadata.generation.unwrap_or(0);
    let observed = status.and_then(|s| s.observed_generation).unwrap_or(0);
    if observed < generation {
        return RolloutState::Progressing("waiting for spec update to be observed".to_string());
    }

    let stalled = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| {
            c.iter().find(|cond| {
                cond.type_ == "Progressing"
                    && cond.reason.as_deref() == Some("ProgressDeadlineExceeded")
            })
        });
    if let Some(cond) = stalled {
        return RolloutState::Failed(
            cond.message
                .clone()
                .unwrap_or_else(|| "progress deadline exceeded".to_string()),
        );
    }

    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let replicas = status.and_then(|s| s.replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    if updated == desired && replicas == updated && available == updated {
        RolloutState::Complete
    } else {
        RolloutState::Progressing(format!(
            "{}/{} updated, {}/{} available",
            updated, desired, available, desired
        ))
    }
}

fn statefulset_state(s: &StatefulSet) -> RolloutState {
    let status = s.status.as_ref();
    let generation = s.metadata.generation.unwrap_or(0);
    let observed = status.and_then(|s| s.observed_generation).unwrap_or(0);
    let desired = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let current_rev = status.and_then(|s| s.current_revision.as_ref());
    let update_rev = status.and_then(|s| s.update_revision.as_ref());

    if observed >= generation && ready == desired && current_rev == update_rev {
        RolloutState::Complete
    } else {
        RolloutState::Progressing(format!(
            "{}/{} ready, revision match: {}",
            ready,
            desired,
            current_rev == update_rev
        ))
    }
}

fn daemonset_state(d: &DaemonSet) -> RolloutState {
    let generation = d.metadata.generation.unwrap_or(0);
    let Some(status) = d.status.as_ref() else {
        return RolloutState::Progressing("no status yet".to_string());
    };
    let observed = status.observed_generation.unwrap_or(0);
    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(0);
    let available = status.number_available.unwrap_or(0);

    if observed >= generation && updated == desired && available == desired {
        RolloutState::Complete
    } else {
        RolloutState::Progressing(format!(
            "{}/{} updated, {}/{} available",
            updated, desired, available, desired
        ))
    }
}

/// The second-highest revision; the highest is the one currently rolled out
fn previous_revision<T>(mut revisions: Vec<(i64, T)>) -> Option<T> {
    revisions.sort_by_key(|(r, _)| *r);
    revisions.pop()?;
    revisions.pop().map(|(_, item)| item)
}

fn owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn no_previous(kind: &str, name: &str) -> KubeError {
    KubeError::RolloutFailed {
        resource: format!("{}/{}", kind, name),
        message: "no previous revision to roll back to".to_string(),
    }
}

fn api_error(e: kube::Error, kind: &str, name: &str, namespace: &str) -> KubeError {
    match e {
        kube::Error::Api(resp) if resp.code == 404 => KubeError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        other => KubeError::Api(other),
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}
