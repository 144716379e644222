//! kubectl-backed cluster client

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::ClusterClient;
use crate::error::{KubeError, Result};

/// Runs cluster operations through the `kubectl` binary
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: PathBuf,
    context: Option<String>,
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

/// Identifies the object a command targets, for error classification
struct Target<'a> {
    kind: &'a str,
    name: &'a str,
    namespace: &'a str,
}

impl KubectlClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            context: None,
        }
    }

    /// Use a specific kubeconfig context
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>, target: Target<'_>) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.binary);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command = format!("kubectl {}", args.join(" "));
        tracing::debug!(%command, "running kubectl");

        let mut child = cmd.spawn().map_err(|e| KubeError::Command {
            command: command.clone(),
            message: format!("failed to spawn {}: {}", self.binary.display(), e),
        })?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| KubeError::Command {
                    command: command.clone(),
                    message: format!("failed to write to stdin: {}", e),
                })?;
            // Close stdin so kubectl sees EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(|e| KubeError::Command {
            command: command.clone(),
            message: format!("failed to wait for kubectl: {}", e),
        })?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&command, &stderr, target))
    }
}

/// Only API server statuses are typed; client-side "not found" messages such
/// as a missing resource mapping stay command errors.
fn classify_failure(command: &str, stderr: &str, target: Target<'_>) -> KubeError {
    if stderr.contains("Error from server (NotFound)") {
        KubeError::NotFound {
            kind: target.kind.to_string(),
            name: target.name.to_string(),
            namespace: target.namespace.to_string(),
        }
    } else if stderr.contains("Error from server (AlreadyExists)") {
        KubeError::AlreadyExists {
            kind: target.kind.to_string(),
            name: target.name.to_string(),
            namespace: target.namespace.to_string(),
        }
    } else {
        KubeError::Command {
            command: command.to_string(),
            message: stderr.to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn apply(&self, manifest: &str, namespace: &str) -> Result<()> {
        let target = Target {
            kind: "manifest",
            name: "-",
            namespace,
        };
        self.run(&["apply", "-n", namespace, "-f", "-"], Some(manifest), target)
            .await?;
        Ok(())
    }

    async fn get(&self, kind: &str, name: &str, namespace: &str) -> Result<serde_json::Value> {
        let target = Target {
            kind,
            name,
            namespace,
        };
        let out = self
            .run(&["get", kind, name, "-n", namespace, "-o", "json"], None, target)
            .await?;
        Ok(serde_json::from_slice(&out)?)
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let target = Target {
            kind,
            name,
            namespace,
        };
        self.run(&["delete", kind, name, "-n", namespace], None, target)
            .await?;
        Ok(())
    }

    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        let resource = format!("{}/{}", kind.to_lowercase(), name);
        let timeout_arg = format!("--timeout={}s", timeout.as_secs().max(1));
        let target = Target {
            kind,
            name,
            namespace,
        };
        self.run(
            &["rollout", "status", &resource, "-n", namespace, &timeout_arg],
            None,
            target,
        )
        .await
        .map_err(|e| match e {
            KubeError::Command { message, .. } => KubeError::RolloutFailed {
                resource: format!("{}/{}", kind, name),
                message,
            },
            other => other,
        })?;
        Ok(())
    }

    async fn rollout_undo(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        let resource = format!("{}/{}", kind.to_lowercase(), name);
        let target = Target {
            kind,
            name,
            namespace,
        };
        self.run(&["rollout", "undo", &resource, "-n", namespace], None, target)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target<'static> {
        Target {
            kind: "Deployment",
            name: "web",
            namespace: "shop",
        }
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_failure(
            "kubectl get",
            "Error from server (NotFound): deployments.apps \"web\" not found",
            target(),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_already_exists() {
        let err = classify_failure(
            "kubectl create",
            "Error from server (AlreadyExists): deployments.apps \"web\" already exists",
            target(),
        );
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_classify_client_side_not_found_is_command_error() {
        let err = classify_failure(
            "kubectl delete",
            "error: resource mapping not found for name: \"web\" namespace: \"shop\": no matches for kind \"Rollout\" in version \"argoproj.io/v1alpha1\"",
            target(),
        );
        assert!(!err.is_not_found());
        assert!(matches!(err, KubeError::Command { .. }));

        let err = classify_failure(
            "kubectl get",
            "error: the server doesn't have a resource type \"widgets\"; binary not found",
            target(),
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_classify_other() {
        let err = classify_failure("kubectl apply", "connection refused", target());
        assert!(matches!(err, KubeError::Command { ref message, .. } if message == "connection refused"));
    }

    #[cfg(unix)]
    fn fake_kubectl(dir: &std::path::Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("kubectl");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_get_parses_json() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_kubectl(dir.path(), r#"echo '{"metadata":{"name":"web"}}'"#);

        let client = KubectlClient::new(bin);
        let obj = client.get("Deployment", "web", "shop").await.unwrap();
        assert_eq!(obj["metadata"]["name"], "web");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_writes_manifest_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let captured = dir.path().join("captured");
        let bin = fake_kubectl(
            dir.path(),
            &format!("echo \"$@\" > {0}.args\ncat > {0}", captured.display()),
        );

        let client = KubectlClient::new(bin).with_context(Some("staging".to_string()));
        client.apply("kind: ConfigMap\n", "shop").await.unwrap();

        assert_eq!(std::fs::read_to_string(&captured).unwrap(), "kind: ConfigMap\n");
        let args = std::fs::read_to_string(dir.path().join("captured.args")).unwrap();
        assert_eq!(args.trim(), "--context staging apply -n shop -f -");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_rollout_status() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_kubectl(dir.path(), "echo 'timed out waiting for the condition' >&2\nexit 1");

        let client = KubectlClient::new(bin);
        let err = client
            .rollout_status("Deployment", "web", "shop", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::RolloutFailed { .. }));
    }
}
