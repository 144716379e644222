//! Rollout watching
//!
//! Every applied workload with a native rollout gets its own task waiting on the
//! rollout status; a workload with a monitor URL gets a second task polling the
//! external monitor. A watch phase succeeds once every task has succeeded and
//! fails on the first error from any of them.
//!
//! Tasks still running when a phase fails are left to finish on their own.
//! Their late failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::cluster::ClusterClient;
use crate::error::{KubeError, ReleaseError};
use crate::manifest::RenderedResource;
use crate::monitor::ExternalMonitor;

type UnitResult = Result<(), ReleaseError>;

/// Watches workloads in one namespace
#[derive(Clone)]
pub struct Watcher {
    cluster: Arc<dyn ClusterClient>,
    monitor: Arc<dyn ExternalMonitor>,
    namespace: String,
    credential: Option<String>,
    rollout_timeout: Duration,
    rollback_timeout: Duration,
    monitors_enabled: bool,
    enabled: bool,
}

impl Watcher {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        monitor: Arc<dyn ExternalMonitor>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            monitor,
            namespace: namespace.into(),
            credential: None,
            rollout_timeout: Duration::from_secs(300),
            rollback_timeout: Duration::from_secs(300),
            monitors_enabled: true,
            enabled: true,
        }
    }

    /// Credential passed to the external monitor
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    /// Defaults used when a resource has no timeout annotation
    pub fn with_timeouts(mut self, rollout: Duration, rollback: Duration) -> Self {
        self.rollout_timeout = rollout;
        self.rollback_timeout = rollback;
        self
    }

    /// Review apps never run external monitors
    pub fn with_monitors(mut self, enabled: bool) -> Self {
        self.monitors_enabled = enabled;
        self
    }

    /// A disabled watcher treats every phase as healthy
    pub fn with_watching(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Resources a watch phase will wait on
    pub fn watched<'r>(&self, resources: &'r [RenderedResource]) -> Vec<&'r RenderedResource> {
        if !self.enabled {
            return Vec::new();
        }
        resources.iter().filter(|r| r.supports_rollback()).collect()
    }

    /// Wait for every workload to roll out; first error wins
    pub async fn watch_workloads(&self, resources: &[RenderedResource]) -> UnitResult {
        let watched = self.watched(resources);
        if watched.is_empty() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<UnitResult>();
        let mut units = 0usize;

        for resource in watched {
            let span = tracing::info_span!(
                "watch",
                resource_kind = %resource.kind,
                resource_name = %resource.name
            );

            units += 1;
            let watcher = self.clone();
            let rollout_resource = resource.clone();
            let timeout = resource.rollout_timeout(self.rollout_timeout);
            spawn_unit(
                &tx,
                resource,
                async move { watcher.rollout(&rollout_resource, timeout).await },
                span.clone(),
            );

            if let Some(url) = self.monitor_url(resource) {
                units += 1;
                let watcher = self.clone();
                let monitor_resource = resource.clone();
                let url = url.to_string();
                spawn_unit(
                    &tx,
                    resource,
                    async move { watcher.watch_monitor(&monitor_resource, &url).await },
                    span,
                );
            }
        }
        drop(tx);

        let mut completed = 0usize;
        while let Some(result) = rx.recv().await {
            completed += 1;
            if let Err(e) = result {
                if completed < units {
                    tokio::spawn(drain_late_failures(rx));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Wait for every reverted workload; all errors are returned
    pub async fn watch_rollback(&self, resources: &[RenderedResource]) -> Vec<ReleaseError> {
        let units = self.watched(resources).into_iter().map(|resource| {
            let span = tracing::info_span!(
                "watch_rollback",
                resource_kind = %resource.kind,
                resource_name = %resource.name
            );
            let timeout = resource.rollback_timeout(self.rollback_timeout);
            async move {
                self.cluster
                    .rollout_status(&resource.kind, &resource.name, &self.namespace, timeout)
                    .await
                    .map_err(|e| ReleaseError::watch_rollback(resource.resource_ref(), e))
            }
            .instrument(span)
        });

        join_all(units)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    fn monitor_url<'r>(&self, resource: &'r RenderedResource) -> Option<&'r str> {
        if !self.monitors_enabled {
            return None;
        }
        resource.policy.monitor_url.as_deref()
    }

    async fn rollout(&self, resource: &RenderedResource, timeout: Duration) -> UnitResult {
        tracing::debug!(timeout_secs = timeout.as_secs(), "waiting for rollout");
        self.cluster
            .rollout_status(&resource.kind, &resource.name, &self.namespace, timeout)
            .await
            .map_err(|e| ReleaseError::watch(resource.resource_ref(), e))
    }

    async fn watch_monitor(&self, resource: &RenderedResource, url: &str) -> UnitResult {
        let window = resource.policy.monitor_window.unwrap_or_default();
        tracing::debug!(%url, window_secs = window.as_secs(), "watching external monitor");
        let outcome = self
            .monitor
            .check(url, self.credential.as_deref(), window)
            .await;
        if outcome.healthy {
            Ok(())
        } else {
            Err(ReleaseError::monitor(
                resource.resource_ref(),
                KubeError::MonitorUnhealthy {
                    url: url.to_string(),
                    detail: outcome.detail,
                },
            ))
        }
    }
}

/// Run one watch unit in the background and report exactly one result for it
fn spawn_unit<F>(
    tx: &mpsc::UnboundedSender<UnitResult>,
    resource: &RenderedResource,
    unit: F,
    span: tracing::Span,
) where
    F: Future<Output = UnitResult> + Send + 'static,
{
    let tx = tx.clone();
    let resource = resource.resource_ref();
    let handle = tokio::spawn(unit.instrument(span));
    tokio::spawn(async move {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ReleaseError::watch(
                resource.clone(),
                KubeError::RolloutFailed {
                    resource: resource.to_string(),
                    message: format!("watch task aborted: {}", e),
                },
            )),
        };
        let _ = tx.send(result);
    });
}

async fn drain_late_failures(mut rx: mpsc::UnboundedReceiver<UnitResult>) {
    while let Some(result) = rx.recv().await {
        if let Err(e) = result {
            e.log();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::ResourcePolicy;
    use crate::cluster::{MockCluster, MockOp};
    use crate::error::Stage;
    use crate::monitor::StaticMonitor;
    use tuber_core::ResourceRef;

    fn workload(kind: &str, name: &str) -> RenderedResource {
        RenderedResource {
            kind: kind.to_string(),
            name: name.to_string(),
            manifest: String::new(),
            policy: ResourcePolicy::default(),
        }
    }

    fn monitored(name: &str) -> RenderedResource {
        let mut r = workload("Deployment", name);
        r.policy.monitor_url = Some(format!("https://sentry.example/{}", name));
        r.policy.monitor_window = Some(Duration::from_secs(60));
        r
    }

    fn watcher(cluster: &MockCluster, monitor: StaticMonitor) -> Watcher {
        Watcher::new(Arc::new(cluster.clone()), Arc::new(monitor), "shop")
            .with_credential(Some("token".to_string()))
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let cluster = MockCluster::new();
        let w = watcher(&cluster, StaticMonitor::healthy());

        w.watch_workloads(&[workload("Deployment", "web"), workload("StatefulSet", "db")])
            .await
            .unwrap();
        assert_eq!(cluster.rollout_checked().len(), 2);
    }

    #[tokio::test]
    async fn test_pods_and_configs_are_not_watched() {
        let cluster = MockCluster::new();
        let w = watcher(&cluster, StaticMonitor::healthy());

        w.watch_workloads(&[workload("Pod", "oneoff"), workload("Service", "web")])
            .await
            .unwrap();
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let cluster = MockCluster::new();
        cluster.fail(MockOp::RolloutStatus, "Deployment", "web", "progress deadline exceeded");
        cluster.delay_rollout("Deployment", "slow", Duration::from_secs(30));
        let w = watcher(&cluster, StaticMonitor::healthy());

        let started = tokio::time::Instant::now();
        let err = w
            .watch_workloads(&[workload("Deployment", "slow"), workload("Deployment", "web")])
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Watch);
        assert_eq!(err.resource, Some(ResourceRef::new("Deployment", "web")));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_monitor_failure_is_distinct() {
        let cluster = MockCluster::new();
        let monitor = StaticMonitor::unhealthy("sentry issue detected");
        let w = watcher(&cluster, monitor.clone());

        let err = w.watch_workloads(&[monitored("web")]).await.unwrap_err();
        assert!(err.is_monitor_failure());
        assert_eq!(monitor.checks()[0].credential.as_deref(), Some("token"));
        assert_eq!(monitor.checks()[0].window, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_review_apps_skip_monitors() {
        let cluster = MockCluster::new();
        let monitor = StaticMonitor::unhealthy("down");
        let w = watcher(&cluster, monitor.clone()).with_monitors(false);

        w.watch_workloads(&[monitored("web")]).await.unwrap();
        assert!(monitor.checks().is_empty());
        assert_eq!(cluster.rollout_checked().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_watcher() {
        let cluster = MockCluster::new();
        cluster.fail(MockOp::RolloutStatus, "Deployment", "web", "broken");
        let w = watcher(&cluster, StaticMonitor::healthy()).with_watching(false);

        w.watch_workloads(&[workload("Deployment", "web")]).await.unwrap();
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_timeouts_from_annotations() {
        let cluster = MockCluster::new();
        let w = watcher(&cluster, StaticMonitor::healthy())
            .with_timeouts(Duration::from_secs(120), Duration::from_secs(60));

        let mut annotated = workload("Deployment", "web");
        annotated.policy.rollout_timeout = Some(Duration::from_secs(900));
        w.watch_workloads(&[annotated, workload("Deployment", "worker")])
            .await
            .unwrap();

        let mut timeouts: Vec<Duration> = cluster
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                crate::cluster::ClusterCall::RolloutStatus { timeout, .. } => Some(timeout),
                _ => None,
            })
            .collect();
        timeouts.sort();
        assert_eq!(timeouts, vec![Duration::from_secs(120), Duration::from_secs(900)]);
    }

    #[tokio::test]
    async fn test_watch_rollback_collects_all_errors() {
        let cluster = MockCluster::new();
        cluster.fail(MockOp::RolloutStatus, "Deployment", "a", "x");
        cluster.fail(MockOp::RolloutStatus, "Deployment", "b", "y");
        let w = watcher(&cluster, StaticMonitor::healthy());

        let errors = w
            .watch_rollback(&[
                workload("Deployment", "a"),
                workload("Deployment", "b"),
                workload("Deployment", "c"),
            ])
            .await;
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.stage == Stage::WatchRollback));
    }
}
