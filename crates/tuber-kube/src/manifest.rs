//! Rendering and classification of an app's manifests
//!
//! Raw manifest groups are interpolated, split into documents, filtered against
//! the app's exclusions and the unmanageable kinds, and sorted into the four
//! ordered lists the release pipeline walks through.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Mapping;
use tuber_core::{AppYamls, ManagedResource, ResourceRef};
use tuber_engine::Engine;

use crate::annotations::ResourcePolicy;
use crate::error::{KubeError, ReleaseError};

/// Kinds that must already exist and are never applied by a release
pub const UNMANAGEABLE_KINDS: &[&str] = &["Secret", "ClusterRole", "ClusterRoleBinding"];

/// Kinds with a native rollout and rollback
pub const ROLLBACK_KINDS: &[&str] = &["Deployment", "DaemonSet", "StatefulSet"];

pub fn supports_rollback(kind: &str) -> bool {
    ROLLBACK_KINDS.contains(&kind)
}

pub fn is_workload(kind: &str) -> bool {
    supports_rollback(kind) || kind == "Pod"
}

pub fn can_be_managed(kind: &str) -> bool {
    !UNMANAGEABLE_KINDS.contains(&kind)
}

/// One interpolated manifest document and its release policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResource {
    pub kind: String,
    pub name: String,
    pub manifest: String,
    pub policy: ResourcePolicy,
}

impl RenderedResource {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.kind, &self.name)
    }

    pub fn supports_rollback(&self) -> bool {
        supports_rollback(&self.kind)
    }

    pub fn is_workload(&self) -> bool {
        is_workload(&self.kind)
    }

    /// Rollout timeout, or `default` when no annotation was set
    pub fn rollout_timeout(&self, default: Duration) -> Duration {
        self.policy.rollout_timeout.unwrap_or(default)
    }

    pub fn rollback_timeout(&self, default: Duration) -> Duration {
        self.policy.rollback_timeout.unwrap_or(default)
    }

    pub fn to_managed(&self) -> ManagedResource {
        ManagedResource::new(&self.kind, &self.name, &self.manifest)
    }
}

/// Classified output of rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCollection {
    pub prerelease: Vec<RenderedResource>,
    pub configs: Vec<RenderedResource>,
    pub workloads: Vec<RenderedResource>,
    pub postrelease: Vec<RenderedResource>,
}

impl ResourceCollection {
    /// Everything a successful release leaves applied: configs, workloads, postrelease
    pub fn released(&self) -> impl Iterator<Item = &RenderedResource> {
        self.configs
            .iter()
            .chain(self.workloads.iter())
            .chain(self.postrelease.iter())
    }
}

#[derive(Debug, Deserialize)]
struct DocumentHeader {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<HeaderMetadata>,
}

#[derive(Debug, Deserialize)]
struct HeaderMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    annotations: Option<Mapping>,
}

/// Interpolates and classifies manifest groups for one release
pub struct Renderer<'a> {
    engine: &'a Engine,
    vars: &'a BTreeMap<String, String>,
}

impl<'a> Renderer<'a> {
    pub fn new(engine: &'a Engine, vars: &'a BTreeMap<String, String>) -> Self {
        Self { engine, vars }
    }

    /// Render all groups into a [`ResourceCollection`]
    pub fn render(
        &self,
        yamls: &AppYamls,
        exclusions: &[ResourceRef],
    ) -> Result<ResourceCollection, ReleaseError> {
        let excluded = self.exclusion_keys(exclusions)?;

        let prerelease = self.render_group(&yamls.prerelease, "prerelease", &excluded)?;
        let release = self.render_group(&yamls.release, "release", &excluded)?;
        let postrelease = self.render_group(&yamls.postrelease, "postrelease", &excluded)?;

        let mut collection = ResourceCollection {
            prerelease: prerelease.into_iter().filter(|r| can_be_managed(&r.kind)).collect(),
            postrelease: postrelease.into_iter().filter(|r| can_be_managed(&r.kind)).collect(),
            ..Default::default()
        };
        for resource in release {
            if resource.is_workload() {
                collection.workloads.push(resource);
            } else if can_be_managed(&resource.kind) {
                collection.configs.push(resource);
            } else {
                tracing::debug!(kind = %resource.kind, name = %resource.name, "skipping unmanageable resource");
            }
        }

        Ok(collection)
    }

    /// Exclusion names may reference interpolation variables
    fn exclusion_keys(&self, exclusions: &[ResourceRef]) -> Result<HashSet<String>, ReleaseError> {
        exclusions
            .iter()
            .map(|r| -> Result<String, ReleaseError> {
                let name = self
                    .engine
                    .render_string(&r.name, self.vars, "exclusions")
                    .map_err(|e| ReleaseError::interpolation(e.into()))?;
                Ok(ResourceRef::new(&r.kind, name).exclusion_key())
            })
            .collect()
    }

    fn render_group(
        &self,
        documents: &[String],
        group: &str,
        excluded: &HashSet<String>,
    ) -> Result<Vec<RenderedResource>, ReleaseError> {
        let rendered = self
            .engine
            .render_group(documents, self.vars, group)
            .map_err(|e| ReleaseError::interpolation(e.into()))?;

        let mut resources = Vec::new();
        for (index, doc) in split_documents(&rendered).into_iter().enumerate() {
            let header: DocumentHeader = serde_yaml::from_str(&doc).map_err(|e| {
                ReleaseError::parse(KubeError::InvalidManifest(format!(
                    "{} document {}: {}",
                    group, index, e
                )))
            })?;

            let kind = header.kind.filter(|k| !k.is_empty());
            let metadata = header.metadata;
            let name = metadata
                .as_ref()
                .and_then(|m| m.name.clone())
                .filter(|n| !n.is_empty());
            let (Some(kind), Some(name)) = (kind, name) else {
                return Err(ReleaseError::parse(KubeError::InvalidManifest(format!(
                    "{} document {} is missing kind or metadata.name",
                    group, index
                ))));
            };

            let resource = ResourceRef::new(&kind, &name);
            if excluded.contains(&resource.exclusion_key()) {
                tracing::debug!(%resource, "excluded");
                continue;
            }

            let policy =
                ResourcePolicy::from_annotations(metadata.as_ref().and_then(|m| m.annotations.as_ref()))
                    .map_err(|e| ReleaseError::annotation(resource.clone(), e))?;

            resources.push(RenderedResource {
                kind,
                name,
                manifest: doc,
                policy,
            });
        }

        Ok(resources)
    }
}

/// Split multi-document YAML on `---` lines, dropping empty and comment-only documents
pub fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        let has_content = current
            .lines()
            .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
        if has_content {
            let mut doc = current.trim_matches('\n').to_string();
            doc.push('\n');
            docs.push(doc);
        }
        current.clear();
    };

    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            flush(&mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(&mut current);

    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        [
            ("tuberImage", "gcr.io/p/app@sha256:abc"),
            ("tuberAppName", "shop"),
            ("worker", "sidekiq"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn deployment(name: &str) -> String {
        format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {}\nspec:\n  template:\n    spec:\n      containers:\n        - image: {{{{ tuberImage }}}}\n",
            name
        )
    }

    fn yamls(release: Vec<String>) -> AppYamls {
        AppYamls {
            release,
            ..Default::default()
        }
    }

    #[test]
    fn test_split_documents() {
        let docs = split_documents("a: 1\n---\n# only a comment\n---\n\n---\nb: 2\n--- \nc: 3");
        assert_eq!(docs, vec!["a: 1\n", "b: 2\n", "c: 3\n"]);
    }

    #[test]
    fn test_exclusion_drops_matching_resource() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let collection = renderer
            .render(
                &yamls(vec![deployment("foo"), deployment("sidekiq")]),
                &[ResourceRef::new("Deployment", "foo")],
            )
            .unwrap();

        let names: Vec<_> = collection.workloads.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sidekiq"]);
    }

    #[test]
    fn test_exclusion_is_case_insensitive_and_interpolated() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let collection = renderer
            .render(
                &yamls(vec![deployment("web"), deployment("sidekiq")]),
                &[ResourceRef::new("deployment", "{{ worker }}")],
            )
            .unwrap();

        let names: Vec<_> = collection.workloads.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web"]);
    }

    #[test]
    fn test_empty_exclusions_keep_everything() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let collection = renderer
            .render(&yamls(vec![deployment("a"), deployment("b")]), &[])
            .unwrap();
        assert_eq!(collection.workloads.len(), 2);
        assert!(collection.workloads[0].manifest.contains("gcr.io/p/app@sha256:abc"));
    }

    #[test]
    fn test_classification() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let release = vec![
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: creds\n".to_string(),
            deployment("web"),
            "apiVersion: apps/v1\nkind: DaemonSet\nmetadata:\n  name: agent\n".to_string(),
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: oneoff\n".to_string(),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n".to_string(),
        ];
        let mut input = yamls(release);
        input.postrelease = vec![
            "apiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: reader\n".to_string(),
            deployment("canary"),
        ];

        let collection = renderer.render(&input, &[]).unwrap();

        let configs: Vec<_> = collection.configs.iter().map(|r| r.name.as_str()).collect();
        let workloads: Vec<_> = collection.workloads.iter().map(|r| r.name.as_str()).collect();
        let post: Vec<_> = collection.postrelease.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(configs, vec!["cfg", "web"]);
        assert_eq!(workloads, vec!["web", "agent", "oneoff"]);
        assert_eq!(post, vec!["canary"]);
        assert!(collection.prerelease.is_empty());
    }

    #[test]
    fn test_undefined_variable_is_interpolation_error() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let err = renderer
            .render(&yamls(vec!["kind: ConfigMap\nmetadata:\n  name: {{ nope }}\n".to_string()]), &[])
            .unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Interpolation);
    }

    #[test]
    fn test_unparsable_document_is_parse_error() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let err = renderer
            .render(&yamls(vec!["kind: [unclosed\n".to_string()]), &[])
            .unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Parse);

        let err = renderer
            .render(&yamls(vec!["apiVersion: v1\nkind: ConfigMap\n".to_string()]), &[])
            .unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Parse);
    }

    #[test]
    fn test_bad_annotation_is_scoped_to_resource() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let doc = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  annotations:\n    tuber/rolloutTimeout: later\n";
        let err = renderer.render(&yamls(vec![doc.to_string()]), &[]).unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Annotation);
        assert_eq!(err.resource, Some(ResourceRef::new("Deployment", "web")));
    }

    #[test]
    fn test_policy_attached() {
        let engine = Engine::default();
        let vars = vars();
        let renderer = Renderer::new(&engine, &vars);

        let doc = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  annotations:\n    tuber/rolloutTimeout: 90s\n";
        let collection = renderer.render(&yamls(vec![doc.to_string()]), &[]).unwrap();
        let web = &collection.workloads[0];
        assert_eq!(web.rollout_timeout(Duration::from_secs(300)), Duration::from_secs(90));
        assert_eq!(web.rollback_timeout(Duration::from_secs(300)), Duration::from_secs(300));
    }

    #[test]
    fn test_managed_roundtrip_keeps_manifest() {
        let resource = RenderedResource {
            kind: "Service".to_string(),
            name: "web".to_string(),
            manifest: "kind: Service\n".to_string(),
            policy: ResourcePolicy::default(),
        };
        let managed = resource.to_managed();
        assert_eq!(managed.resource_ref(), resource.resource_ref());
        assert_eq!(managed.manifest().unwrap(), resource.manifest);
    }
}
