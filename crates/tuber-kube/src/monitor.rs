//! External health signals watched after a rollout
//!
//! A monitor is polled for a window of time. Reaching the end of the window
//! without an unhealthy answer counts as healthy.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

/// Result of watching one monitor URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub healthy: bool,
    /// Operator-facing explanation when unhealthy
    pub detail: String,
}

impl MonitorOutcome {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: String::new(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait ExternalMonitor: Send + Sync {
    /// Poll `url` until `window` elapses or it reports unhealthy
    async fn check(&self, url: &str, credential: Option<&str>, window: Duration) -> MonitorOutcome;
}

#[async_trait]
impl<T: ExternalMonitor + ?Sized> ExternalMonitor for Arc<T> {
    async fn check(&self, url: &str, credential: Option<&str>, window: Duration) -> MonitorOutcome {
        (**self).check(url, credential, window).await
    }
}

/// Watches a Sentry issues query; any returned issue is unhealthy
pub struct SentryMonitor {
    http: reqwest::Client,
    interval: Duration,
}

#[derive(Debug, Deserialize)]
struct SentryIssue {
    #[serde(default)]
    permalink: String,
}

impl SentryMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            interval,
        }
    }

    async fn check_once(&self, url: &str, credential: Option<&str>) -> MonitorOutcome {
        let mut request = self.http.get(url);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%url, error = %e, "sentry request failed");
                return MonitorOutcome::unhealthy("error performing sentry request");
            }
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(_) => return MonitorOutcome::unhealthy("failed to read sentry response"),
        };

        let issues = if status.is_success() {
            serde_json::from_str::<Vec<SentryIssue>>(&body).ok()
        } else {
            None
        };
        let Some(issues) = issues else {
            tracing::warn!(%url, %body, "bad response from sentry api");
            return MonitorOutcome::unhealthy(format!("bad response from sentry api\n```{}```", body));
        };

        match issues.first() {
            None => MonitorOutcome::healthy(),
            Some(issue) => MonitorOutcome::unhealthy(format!(
                "sentry issue detected: <{}|View in Sentry>",
                issue.permalink
            )),
        }
    }
}

impl Default for SentryMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ExternalMonitor for SentryMonitor {
    async fn check(&self, url: &str, credential: Option<&str>, window: Duration) -> MonitorOutcome {
        let deadline = Instant::now() + window;
        loop {
            if Instant::now() >= deadline {
                return MonitorOutcome::healthy();
            }
            tracing::debug!(%url, "polling sentry");
            let outcome = self.check_once(url, credential).await;
            if !outcome.healthy {
                return outcome;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// A recorded [`StaticMonitor::check`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorCheck {
    pub url: String,
    pub credential: Option<String>,
    pub window: Duration,
}

/// Answers every check with a fixed outcome and records it
#[derive(Clone)]
pub struct StaticMonitor {
    outcome: MonitorOutcome,
    checks: Arc<RwLock<Vec<MonitorCheck>>>,
}

impl StaticMonitor {
    pub fn healthy() -> Self {
        Self::with_outcome(MonitorOutcome::healthy())
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self::with_outcome(MonitorOutcome::unhealthy(detail))
    }

    fn with_outcome(outcome: MonitorOutcome) -> Self {
        Self {
            outcome,
            checks: Arc::default(),
        }
    }

    pub fn checks(&self) -> Vec<MonitorCheck> {
        self.checks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ExternalMonitor for StaticMonitor {
    async fn check(&self, url: &str, credential: Option<&str>, window: Duration) -> MonitorOutcome {
        self.checks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(MonitorCheck {
                url: url.to_string(),
                credential: credential.map(str::to_string),
                window,
            });
        self.outcome.clone()
    }
}
