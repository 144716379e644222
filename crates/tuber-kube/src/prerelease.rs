//! Run-to-completion Pods applied before anything else in a release
//!
//! Each Pod is applied, polled until it reaches `Succeeded` or `Failed` (or the
//! timeout passes) and then deleted whatever the outcome. Pods run one at a
//! time in manifest order; the first failure stops the release.

use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::cluster::ClusterClient;
use crate::error::{KubeError, ReleaseError, Result};
use crate::manifest::RenderedResource;

const POD: &str = "Pod";

pub struct PrereleaseRunner<'a> {
    cluster: &'a dyn ClusterClient,
    namespace: &'a str,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> PrereleaseRunner<'a> {
    pub fn new(
        cluster: &'a dyn ClusterClient,
        namespace: &'a str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            namespace,
            timeout,
            poll_interval,
        }
    }

    pub async fn run(&self, pods: &[RenderedResource]) -> std::result::Result<(), ReleaseError> {
        // Nothing is applied unless every prerelease resource is a Pod
        if let Some(other) = pods.iter().find(|r| r.kind != POD) {
            return Err(ReleaseError::prerelease(
                other.resource_ref(),
                KubeError::InvalidPrerelease {
                    kind: other.kind.clone(),
                    name: other.name.clone(),
                },
            ));
        }

        for pod in pods {
            let span = tracing::info_span!(
                "prerelease",
                resource_kind = %pod.kind,
                resource_name = %pod.name
            );
            self.run_pod(pod)
                .instrument(span.clone())
                .await
                .map_err(|e| span.in_scope(|| ReleaseError::prerelease(pod.resource_ref(), e)))?;
        }
        Ok(())
    }

    async fn run_pod(&self, pod: &RenderedResource) -> Result<()> {
        tracing::debug!("applying prerelease pod");
        self.cluster.apply(&pod.manifest, self.namespace).await?;

        let outcome = self.wait_for_completion(pod).await;

        let deleted = match self.cluster.delete(POD, &pod.name, self.namespace).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        };

        match (outcome, deleted) {
            (Ok(()), deleted) => deleted,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(delete_err)) => {
                tracing::warn!(error = %delete_err, "failed to delete prerelease pod");
                Err(e)
            }
        }
    }

    async fn wait_for_completion(&self, pod: &RenderedResource) -> Result<()> {
        let deadline = Instant::now() + pod.rollout_timeout(self.timeout);

        loop {
            if Instant::now() >= deadline {
                return Err(KubeError::Timeout(format!(
                    "{}s waiting for prerelease pod '{}'",
                    pod.rollout_timeout(self.timeout).as_secs(),
                    pod.name
                )));
            }
            tokio::time::sleep(self.poll_interval).await;

            let live = self.cluster.get(POD, &pod.name, self.namespace).await?;
            match live.pointer("/status/phase").and_then(|p| p.as_str()) {
                Some("Succeeded") => {
                    tracing::debug!("prerelease pod succeeded");
                    return Ok(());
                }
                Some("Failed") => {
                    return Err(KubeError::PrereleaseFailed {
                        name: pod.name.clone(),
                        message: termination_messages(&live),
                    });
                }
                phase => tracing::trace!(?phase, "prerelease pod still running"),
            }
        }
    }
}

/// Concatenated `state.terminated.message` of every container
fn termination_messages(pod: &serde_json::Value) -> String {
    pod.pointer("/status/containerStatuses")
        .and_then(|s| s.as_array())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|s| s.pointer("/state/terminated/message"))
                .filter_map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
