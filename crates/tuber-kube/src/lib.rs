//! Tuber Kube - release orchestration for Tuber
//!
//! This crate provides:
//! - **Rendering**: interpolate an app's manifests, apply exclusions and classify
//!   them into prerelease, configs, workloads and postrelease
//! - **Release Pipeline**: phased apply with rollout watching, automatic rollback
//!   and state reconciliation ([`Releaser`])
//! - **Cluster Clients**: kubectl, native API and in-memory backends
//! - **App Stores**: ConfigMap, file and in-memory persistence of app records
//! - **Collaborators**: notifiers, error reporters, external monitors and
//!   manifest resolvers, each with an in-memory double for tests

pub mod annotations;
pub mod cluster;
pub mod error;
pub mod manifest;
pub mod monitor;
pub mod notify;
pub mod prerelease;
pub mod reconcile;
pub mod release;
pub mod report;
pub mod resolver;
pub mod rollback;
pub mod store;
pub mod watch;

pub use annotations::ResourcePolicy;
pub use cluster::{ApiClusterClient, ClusterCall, ClusterClient, KubectlClient, MockCluster, MockOp};
pub use error::{KubeError, ReleaseError, Result, Stage};
pub use manifest::{RenderedResource, Renderer, ResourceCollection};
pub use monitor::{ExternalMonitor, MonitorOutcome, SentryMonitor, StaticMonitor};
pub use notify::{LogNotifier, MemoryNotifier, Notice, Notifier, SlackNotifier};
pub use release::{ReleaseOutcome, ReleaseSummary, Releaser};
pub use report::{ErrorReporter, LogReporter, MemoryReporter, Scope};
pub use resolver::{DirectoryResolver, ManifestResolver, StaticResolver};
pub use store::{AppStore, ConfigMapStore, FileStore, MockAppStore};
pub use watch::Watcher;
