//! In-memory cluster for testing
//!
//! Records every call, stores applied objects as JSON and lets tests script
//! failures, rollout delays, prerelease pod phases and owner references.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tuber_core::ResourceRef;

use super::ClusterClient;
use crate::error::{KubeError, Result};

/// A call made against the mock cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    Apply {
        resource: ResourceRef,
        namespace: String,
        manifest: String,
    },
    Get {
        resource: ResourceRef,
        namespace: String,
    },
    Delete {
        resource: ResourceRef,
        namespace: String,
    },
    RolloutStatus {
        resource: ResourceRef,
        namespace: String,
        timeout: Duration,
    },
    RolloutUndo {
        resource: ResourceRef,
        namespace: String,
    },
}

impl ClusterCall {
    pub fn resource(&self) -> &ResourceRef {
        match self {
            ClusterCall::Apply { resource, .. }
            | ClusterCall::Get { resource, .. }
            | ClusterCall::Delete { resource, .. }
            | ClusterCall::RolloutStatus { resource, .. }
            | ClusterCall::RolloutUndo { resource, .. } => resource,
        }
    }
}

/// Operation a scripted failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Apply,
    Get,
    Delete,
    RolloutStatus,
    RolloutUndo,
}

type ObjectKey = (String, String, String);

#[derive(Default)]
struct MockState {
    objects: HashMap<ObjectKey, serde_json::Value>,
    calls: Vec<ClusterCall>,
    failures: HashMap<(MockOp, ResourceRef), String>,
    rollout_delays: HashMap<ResourceRef, Duration>,
    pod_phases: HashMap<String, VecDeque<String>>,
    termination_messages: HashMap<String, String>,
    owned: HashSet<ResourceRef>,
}

/// In-memory [`ClusterClient`]
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
}

fn key(namespace: &str, kind: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), kind.to_string(), name.to_string())
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Make an operation on `kind/name` fail with `message`
    pub fn fail(&self, op: MockOp, kind: &str, name: &str, message: &str) {
        self.write()
            .failures
            .insert((op, ResourceRef::new(kind, name)), message.to_string());
    }

    /// Remove a scripted failure
    pub fn clear_failure(&self, op: MockOp, kind: &str, name: &str) {
        self.write().failures.remove(&(op, ResourceRef::new(kind, name)));
    }

    /// Make `rollout_status` for `kind/name` take `delay` before answering
    pub fn delay_rollout(&self, kind: &str, name: &str, delay: Duration) {
        self.write()
            .rollout_delays
            .insert(ResourceRef::new(kind, name), delay);
    }

    /// Phases a pod reports on successive gets; the last one repeats
    pub fn script_pod_phases(&self, name: &str, phases: &[&str]) {
        self.write().pod_phases.insert(
            name.to_string(),
            phases.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn set_termination_message(&self, pod: &str, message: &str) {
        self.write()
            .termination_messages
            .insert(pod.to_string(), message.to_string());
    }

    /// Report `kind/name` as owned by another object
    pub fn set_owned(&self, kind: &str, name: &str) {
        self.write().owned.insert(ResourceRef::new(kind, name));
    }

    /// Seed a live object without recording a call
    pub fn insert_object(&self, namespace: &str, manifest: &str) -> Result<()> {
        let (resource, object) = parse_object(manifest)?;
        self.write()
            .objects
            .insert(key(namespace, &resource.kind, &resource.name), object);
        Ok(())
    }

    pub fn object(&self, namespace: &str, kind: &str, name: &str) -> Option<serde_json::Value> {
        self.read().objects.get(&key(namespace, kind, name)).cloned()
    }

    pub fn has_object(&self, namespace: &str, kind: &str, name: &str) -> bool {
        self.object(namespace, kind, name).is_some()
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.read().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.write().calls.clear();
    }

    fn matching(&self, pred: impl Fn(&ClusterCall) -> bool) -> Vec<ResourceRef> {
        self.read()
            .calls
            .iter()
            .filter(|c| pred(c))
            .map(|c| c.resource().clone())
            .collect()
    }

    /// Resources passed to `apply`, in call order
    pub fn applied(&self) -> Vec<ResourceRef> {
        self.matching(|c| matches!(c, ClusterCall::Apply { .. }))
    }

    /// Manifests passed to `apply`, in call order
    pub fn applied_manifests(&self) -> Vec<String> {
        self.read()
            .calls
            .iter()
            .filter_map(|c| match c {
                ClusterCall::Apply { manifest, .. } => Some(manifest.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.matching(|c| matches!(c, ClusterCall::Delete { .. }))
    }

    pub fn rollout_checked(&self) -> Vec<ResourceRef> {
        self.matching(|c| matches!(c, ClusterCall::RolloutStatus { .. }))
    }

    pub fn undone(&self) -> Vec<ResourceRef> {
        self.matching(|c| matches!(c, ClusterCall::RolloutUndo { .. }))
    }

    fn record(&self, call: ClusterCall) {
        self.write().calls.push(call);
    }

    fn scripted_failure(&self, op: MockOp, resource: &ResourceRef) -> Option<KubeError> {
        self.read()
            .failures
            .get(&(op, resource.clone()))
            .map(|message| match op {
                MockOp::RolloutStatus => KubeError::RolloutFailed {
                    resource: resource.to_string(),
                    message: message.clone(),
                },
                _ => KubeError::Command {
                    command: format!("{:?} {}", op, resource),
                    message: message.clone(),
                },
            })
    }

    fn not_found(resource: &ResourceRef, namespace: &str) -> KubeError {
        KubeError::NotFound {
            kind: resource.kind.clone(),
            name: resource.name.clone(),
            namespace: namespace.to_string(),
        }
    }
}

fn parse_object(manifest: &str) -> Result<(ResourceRef, serde_json::Value)> {
    let object: serde_json::Value = serde_yaml::from_str(manifest)?;
    let kind = object["kind"].as_str().unwrap_or_default().to_string();
    let name = object["metadata"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if kind.is_empty() || name.is_empty() {
        return Err(KubeError::InvalidManifest(
            "missing kind or metadata.name".to_string(),
        ));
    }
    Ok((ResourceRef::new(kind, name), object))
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn apply(&self, manifest: &str, namespace: &str) -> Result<()> {
        let (resource, object) = parse_object(manifest)?;
        self.record(ClusterCall::Apply {
            resource: resource.clone(),
            namespace: namespace.to_string(),
            manifest: manifest.to_string(),
        });
        if let Some(err) = self.scripted_failure(MockOp::Apply, &resource) {
            return Err(err);
        }
        self.write()
            .objects
            .insert(key(namespace, &resource.kind, &resource.name), object);
        Ok(())
    }

    async fn get(&self, kind: &str, name: &str, namespace: &str) -> Result<serde_json::Value> {
        let resource = ResourceRef::new(kind, name);
        self.record(ClusterCall::Get {
            resource: resource.clone(),
            namespace: namespace.to_string(),
        });
        if let Some(err) = self.scripted_failure(MockOp::Get, &resource) {
            return Err(err);
        }

        let mut state = self.write();
        let mut object = state
            .objects
            .get(&key(namespace, kind, name))
            .cloned()
            .ok_or_else(|| Self::not_found(&resource, namespace))?;

        if state.owned.contains(&resource) {
            object["metadata"]["ownerReferences"] =
                json!([{ "kind": "ReplicaSet", "name": format!("{}-owner", name) }]);
        }

        if kind == "Pod" {
            let phase = match state.pod_phases.get_mut(name) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            if let Some(phase) = phase {
                object["status"]["phase"] = json!(phase);
                if let Some(message) = state.termination_messages.get(name) {
                    object["status"]["containerStatuses"] =
                        json!([{ "state": { "terminated": { "message": message } } }]);
                }
            }
        }

        Ok(object)
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let resource = ResourceRef::new(kind, name);
        self.record(ClusterCall::Delete {
            resource: resource.clone(),
            namespace: namespace.to_string(),
        });
        if let Some(err) = self.scripted_failure(MockOp::Delete, &resource) {
            return Err(err);
        }
        self.write()
            .objects
            .remove(&key(namespace, kind, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(&resource, namespace))
    }

    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        let resource = ResourceRef::new(kind, name);
        self.record(ClusterCall::RolloutStatus {
            resource: resource.clone(),
            namespace: namespace.to_string(),
            timeout,
        });

        let delay = self.read().rollout_delays.get(&resource).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.scripted_failure(MockOp::RolloutStatus, &resource) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollout_undo(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let resource = ResourceRef::new(kind, name);
        self.record(ClusterCall::RolloutUndo {
            resource: resource.clone(),
            namespace: namespace.to_string(),
        });
        match self.scripted_failure(MockOp::RolloutUndo, &resource) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
