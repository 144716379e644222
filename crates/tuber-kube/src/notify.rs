//! Release notifications
//!
//! Notifications are best effort: delivery failures are logged and never
//! reach the release pipeline.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use tuber_core::SlackConfig;

/// A status message about one app's release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Started { app: String, digest: String },
    CanaryStarting { app: String },
    CanaryDeployed { app: String },
    /// Release failed and was rolled back; `error` names the offending resource
    Failed { app: String, error: String },
    /// An external monitor reported the new release unhealthy
    MonitorFailed { app: String, error: String },
    /// The cluster changed but the new state could not be saved
    RollbackUnsafe { app: String, error: String },
    Complete { app: String },
    Paused { app: String },
    ManifestsNotFound { app: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Started { app, digest } => {
                write!(f, ":rocket: *{}*: release started\n`{}`", app, digest)
            }
            Notice::CanaryStarting { app } => write!(f, ":hatching_chick: *{}*: canary starting", app),
            Notice::CanaryDeployed { app } => write!(f, ":hatched_chick: *{}*: deployed to canary", app),
            Notice::Failed { app, error } => write!(
                f,
                "<!here> :loudspeaker: release failed for *{}*\n```{}```",
                app, error
            ),
            Notice::MonitorFailed { app, error } => write!(
                f,
                "<!here> :rotating_light: monitoring failed for *{}*, release rolled back\n```{}```",
                app, error
            ),
            Notice::RollbackUnsafe { app, error } => write!(
                f,
                "<!here> :fire: *{}*: release state was not saved, manual intervention required, rollback is not safe\n```{}```",
                app, error
            ),
            Notice::Complete { app } => write!(f, ":checkered_flag: *{}*: release complete", app),
            Notice::Paused { app } => write!(
                f,
                ":double_vertical_bar: release skipped for {} as it is paused",
                app
            ),
            Notice::ManifestsNotFound { app } => write!(
                f,
                ":skull_and_crossbones: image or tuber layer not found for {}",
                app
            ),
        }
    }
}

/// Fire-and-forget message delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `text` to `channel`, or to the default destination when `None`
    async fn message(&self, text: &str, channel: Option<&str>);

    async fn notify(&self, notice: &Notice, channel: Option<&str>) {
        self.message(&notice.to_string(), channel).await;
    }
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn message(&self, text: &str, channel: Option<&str>) {
        (**self).message(text, channel).await;
    }
}

/// Posts messages with Slack's `chat.postMessage`
pub struct SlackNotifier {
    http: reqwest::Client,
    config: SlackConfig,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn send(&self, channel: &str, text: &str) -> Result<(), String> {
        let url = format!("{}/chat.postMessage", self.config.api_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&serde_json::json!({ "channel": channel, "text": text, "unfurl_links": false }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("slack returned {}", status));
        }

        let body: SlackResponse = response.json().await.map_err(|e| e.to_string())?;
        if body.ok {
            Ok(())
        } else {
            Err(body.error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn message(&self, text: &str, channel: Option<&str>) {
        let channel = channel
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.config.catch_all_channel);

        if !self.config.enabled {
            tracing::debug!(%channel, message = text, "slack disabled, message not sent");
            return;
        }

        match self.send(channel, text).await {
            Ok(()) => tracing::debug!(%channel, "posted slack message"),
            Err(error) => tracing::error!(%channel, %error, "error sending slack message"),
        }
    }
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn message(&self, text: &str, channel: Option<&str>) {
        tracing::info!(channel = channel.unwrap_or_default(), message = text, "notification");
    }
}

/// A message captured by [`MemoryNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: Option<String>,
    pub text: String,
}

/// Records every message for assertions
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    messages: Arc<RwLock<Vec<SentMessage>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }

    /// Whether any message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.text.contains(needle))
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn message(&self, text: &str, channel: Option<&str>) {
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                channel: channel.map(str::to_string),
                text: text.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slack_config(server: &MockServer, enabled: bool) -> SlackConfig {
        SlackConfig {
            enabled,
            token: "xoxb-test".to_string(),
            catch_all_channel: "#catch-all".to_string(),
            api_url: server.uri(),
        }
    }

    #[test]
    fn test_notice_texts() {
        let paused = Notice::Paused { app: "shop".to_string() };
        assert_eq!(
            paused.to_string(),
            ":double_vertical_bar: release skipped for shop as it is paused"
        );

        let failed = Notice::Failed {
            app: "shop".to_string(),
            error: "apply Deployment/web: boom".to_string(),
        };
        assert!(failed.to_string().contains("release failed for *shop*"));
        assert!(failed.to_string().contains("Deployment/web"));

        let monitor = Notice::MonitorFailed {
            app: "shop".to_string(),
            error: "x".to_string(),
        };
        assert!(monitor.to_string().contains("monitoring failed"));
        assert!(!monitor.to_string().contains("release failed"));

        let unsafe_rollback = Notice::RollbackUnsafe {
            app: "shop".to_string(),
            error: "x".to_string(),
        };
        assert!(unsafe_rollback.to_string().contains("rollback is not safe"));
    }

    #[tokio::test]
    async fn test_slack_uses_app_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(serde_json::json!({ "channel": "#shop", "text": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(slack_config(&server, true));
        notifier.message("hi", Some("#shop")).await;
    }

    #[tokio::test]
    async fn test_slack_falls_back_to_catch_all() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(serde_json::json!({ "channel": "#catch-all" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(slack_config(&server, true));
        notifier.message("hi", None).await;
        notifier.message("hi", Some("")).await;
    }

    #[tokio::test]
    async fn test_slack_disabled_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(slack_config(&server, false));
        notifier.message("hi", Some("#shop")).await;
    }

    #[tokio::test]
    async fn test_slack_errors_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ok": false, "error": "channel_not_found" })),
            )
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(slack_config(&server, true));
        assert_eq!(
            notifier.send("#nope", "hi").await,
            Err("channel_not_found".to_string())
        );
        notifier.message("hi", Some("#nope")).await;
    }

    #[tokio::test]
    async fn test_memory_notifier() {
        let notifier = MemoryNotifier::new();
        notifier
            .notify(&Notice::Complete { app: "shop".to_string() }, Some("#shop"))
            .await;
        assert_eq!(
            notifier.messages(),
            vec![SentMessage {
                channel: Some("#shop".to_string()),
                text: ":checkered_flag: *shop*: release complete".to_string(),
            }]
        );
        assert!(notifier.contains("release complete"));
    }
}
