//! Error types for tuber-kube

use std::fmt;

use thiserror::Error;
use tracing::Span;
use tuber_core::ResourceRef;

use crate::report::Scope;

/// Result type for tuber-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors raised by cluster, store and manifest operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Object already exists
    #[error("{kind} '{name}' already exists in namespace '{namespace}'")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },

    /// External command exited unsuccessfully
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    /// Rollout did not become healthy
    #[error("rollout of {resource} failed: {message}")]
    RolloutFailed { resource: String, message: String },

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// Prerelease pod ended in the Failed phase
    #[error("prerelease pod '{name}' failed: {message}")]
    PrereleaseFailed { name: String, message: String },

    /// Prerelease group contained something other than a Pod
    #[error("prerelease resources must be Pods, received {kind} '{name}'")]
    InvalidPrerelease { kind: String, name: String },

    /// External monitor reported the workload unhealthy
    #[error("monitor {url} reported unhealthy: {detail}")]
    MonitorUnhealthy { url: String, detail: String },

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Annotation value could not be parsed
    #[error("invalid value '{value}' for annotation {key}: {message}")]
    InvalidAnnotation {
        key: String,
        value: String,
        message: String,
    },

    /// Kind with no known API resource
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// App record missing from the store
    #[error("app '{0}' not found")]
    AppNotFound(String),

    /// No manifest layer for the requested digest
    #[error("no tuber manifests found for {repository}@{digest}")]
    ManifestsNotFound { repository: String, digest: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// HTTP error talking to a notifier or monitor
    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Core(#[from] tuber_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<tuber_engine::EngineError> for KubeError {
    fn from(e: tuber_engine::EngineError) -> Self {
        KubeError::Template(e.to_string())
    }
}

impl From<reqwest::Error> for KubeError {
    fn from(e: reqwest::Error) -> Self {
        KubeError::Http(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a "not found" error from any cluster client
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is an "already exists" error from any cluster client
    pub fn is_already_exists(&self) -> bool {
        match self {
            KubeError::AlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }
}

/// Point in the release where an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    LoadState,
    Interpolation,
    Parse,
    Annotation,
    Prerelease,
    Apply,
    Watch,
    Monitor,
    Rollback,
    DeleteNew,
    WatchRollback,
    Cleanup,
    PersistState,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve manifests",
            Stage::LoadState => "load state",
            Stage::Interpolation => "interpolation",
            Stage::Parse => "parse",
            Stage::Annotation => "invalid annotation",
            Stage::Prerelease => "prerelease",
            Stage::Apply => "apply",
            Stage::Watch => "watch workload",
            Stage::Monitor => "monitor",
            Stage::Rollback => "rollback",
            Stage::DeleteNew => "deleting newly created resource on error",
            Stage::WatchRollback => "watch rollback",
            Stage::Cleanup => "cleanup",
            Stage::PersistState => "persist state",
        }
    }

    /// A failure after the cluster was changed but before the new state was saved
    pub fn is_rollback_unsafe(&self) -> bool {
        matches!(self, Stage::PersistState)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure during a release, tagged with where it happened
///
/// The span is the one that was current when the error was built, so logging
/// through [`ReleaseError::log`] keeps the app and resource fields of the
/// operation that failed.
#[derive(Debug)]
pub struct ReleaseError {
    pub stage: Stage,
    pub resource: Option<ResourceRef>,
    pub scope: Scope,
    pub span: Span,
    pub source: KubeError,
}

impl ReleaseError {
    fn new(stage: Stage, resource: Option<ResourceRef>, source: KubeError) -> Self {
        let mut scope = Scope::new();
        if let Some(r) = &resource {
            scope = scope
                .with("resourceKind", r.kind.clone())
                .with("resourceName", r.name.clone());
        }
        Self {
            stage,
            resource,
            scope: scope.with_context(stage.label()),
            span: Span::current(),
            source,
        }
    }

    pub fn resolve(source: KubeError) -> Self {
        Self::new(Stage::Resolve, None, source)
    }

    pub fn load_state(source: KubeError) -> Self {
        Self::new(Stage::LoadState, None, source)
    }

    pub fn interpolation(source: KubeError) -> Self {
        Self::new(Stage::Interpolation, None, source)
    }

    pub fn parse(source: KubeError) -> Self {
        Self::new(Stage::Parse, None, source)
    }

    pub fn annotation(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Annotation, Some(resource), source)
    }

    pub fn prerelease(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Prerelease, Some(resource), source)
    }

    pub fn apply(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Apply, Some(resource), source)
    }

    pub fn watch(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Watch, Some(resource), source)
    }

    pub fn monitor(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Monitor, Some(resource), source)
    }

    pub fn rollback(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Rollback, Some(resource), source)
    }

    pub fn delete_new(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::DeleteNew, Some(resource), source)
    }

    pub fn watch_rollback(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::WatchRollback, Some(resource), source)
    }

    pub fn cleanup(resource: ResourceRef, source: KubeError) -> Self {
        Self::new(Stage::Cleanup, Some(resource), source)
    }

    pub fn persist_state(source: KubeError) -> Self {
        Self::new(Stage::PersistState, None, source)
    }

    /// Layer release-wide context under this error's own scope
    pub fn with_base_scope(mut self, base: &Scope) -> Self {
        self.scope = base.merged(&self.scope);
        self
    }

    pub fn is_monitor_failure(&self) -> bool {
        self.stage == Stage::Monitor
    }

    /// Emit the error inside the span it was raised in
    pub fn log(&self) {
        let resource = self
            .resource
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default();
        self.span.in_scope(|| {
            tracing::error!(
                stage = self.stage.label(),
                resource = %resource,
                error = %self.source,
                "release error"
            );
        });
    }
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(r) => write!(f, "{} {}: {}", self.stage, r, self.source),
            None => write!(f, "{}: {}", self.stage, self.source),
        }
    }
}

impl std::error::Error for ReleaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
