//! Integration tests for CLI commands

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A config file with a file-backed app store and an unusable kubectl
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = format!(
            "store:\n  type: file\n  dir: {}\ncluster:\n  defaultHost: apps.example.com\nclusterClient:\n  type: kubectl\n  binary: {}\ntimings:\n  prereleasePoll: 10ms\n",
            dir.path().join("apps").display(),
            dir.path().join("no-such-kubectl").display(),
        );
        std::fs::write(dir.path().join("config.yaml"), config).unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    fn tuber(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_tuber"))
            .arg("--config")
            .arg(self.config())
            .args(args)
            .env_remove("RUST_LOG")
            .env_remove("TUBER_CLUSTER_DEFAULT_HOST")
            .output()
            .expect("Failed to execute tuber")
    }
}

/// Get the fixtures path
fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(name)
        .display()
        .to_string()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

mod render_command {
    use super::*;

    #[test]
    fn test_render_yaml_in_apply_order() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        let output = ws.tuber(&[
            "render",
            "shop",
            "--digest",
            "gcr.io/acme/shop@sha256:abc",
            "--manifests",
            &demo,
            "--var",
            "greeting=hello",
        ]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let out = stdout(&output);
        let headers: Vec<_> = out.lines().filter(|l| l.starts_with("# ")).collect();
        assert_eq!(
            headers,
            vec![
                "# prerelease: Pod/shop-migrate",
                "# config: ConfigMap/shop-env",
                "# config: Service/shop",
                "# workload: Deployment/shop",
                "# postrelease: Deployment/shop-canary",
            ]
        );
        assert!(out.contains("GREETING: \"hello\""));
        assert!(out.contains("HOST: \"shop.apps.example.com\""));
        assert!(out.contains("image: \"gcr.io/acme/shop@sha256:abc\""));
    }

    #[test]
    fn test_render_json_with_exclusion() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        let output = ws.tuber(&[
            "render",
            "shop",
            "--digest",
            "sha256:abc",
            "--manifests",
            &demo,
            "--var",
            "greeting=hi",
            "--exclude",
            "Service/shop",
            "--json",
        ]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let json: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("Output should be valid JSON");
        assert_eq!(json["app"], "shop");
        assert_eq!(
            json["configs"],
            serde_json::json!([{"kind": "ConfigMap", "name": "shop-env"}])
        );
        assert_eq!(
            json["workloads"],
            serde_json::json!([{"kind": "Deployment", "name": "shop"}])
        );
        assert_eq!(json["prerelease"][0]["name"], "shop-migrate");
        assert_eq!(json["postrelease"][0]["name"], "shop-canary");
    }

    #[test]
    fn test_render_undefined_variable_fails() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        let output = ws.tuber(&["render", "shop", "--digest", "d", "--manifests", &demo]);

        assert_eq!(output.status.code(), Some(4));
    }

    #[test]
    fn test_render_invalid_annotation_fails() {
        let ws = Workspace::new();
        let broken = fixture("broken-app");
        let output = ws.tuber(&["render", "web", "--digest", "d", "--manifests", &broken]);

        assert_eq!(output.status.code(), Some(4));
        assert!(stderr(&output).contains("tuber/rolloutTimeout"));
    }

    #[test]
    fn test_render_excluded_invalid_resource_is_skipped() {
        let ws = Workspace::new();
        let broken = fixture("broken-app");
        let output = ws.tuber(&[
            "render",
            "web",
            "--digest",
            "d",
            "--manifests",
            &broken,
            "--exclude",
            "Deployment/web",
        ]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).trim().is_empty());
    }

    #[test]
    fn test_render_bad_var_is_input_error() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        let output = ws.tuber(&[
            "render", "shop", "--digest", "d", "--manifests", &demo, "--var", "greeting",
        ]);

        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_render_missing_manifests() {
        let ws = Workspace::new();
        let empty = ws.dir.path().display().to_string();
        let output = ws.tuber(&["render", "shop", "--digest", "d", "--manifests", &empty]);

        assert_eq!(output.status.code(), Some(4));
        assert!(stderr(&output).contains("no tuber manifests found"));
    }
}

mod apps_command {
    use super::*;

    #[test]
    fn test_create_and_show() {
        let ws = Workspace::new();
        let output = ws.tuber(&[
            "apps",
            "create",
            "shop",
            "gcr.io/acme/shop:main",
            "--channel",
            "#shop",
        ]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let output = ws.tuber(&["apps", "show", "shop"]);
        assert!(output.status.success());
        let out = stdout(&output);
        assert!(out.contains("gcr.io/acme/shop:main"));
        assert!(out.contains("#shop"));
        assert!(out.contains("0 resources"));
    }

    #[test]
    fn test_create_twice_fails() {
        let ws = Workspace::new();
        assert!(ws.tuber(&["apps", "create", "shop", "img"]).status.success());

        let output = ws.tuber(&["apps", "create", "shop", "img"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("already exists"));
    }

    #[test]
    fn test_create_rejects_invalid_name() {
        let ws = Workspace::new();
        let output = ws.tuber(&["apps", "create", "Shop_App", "img"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_show_missing_app() {
        let ws = Workspace::new();
        let output = ws.tuber(&["apps", "show", "ghost"]);
        assert_eq!(output.status.code(), Some(8));
        assert!(stderr(&output).contains("ghost"));
    }

    #[test]
    fn test_edit_exclusions_and_vars() {
        let ws = Workspace::new();
        assert!(ws.tuber(&["apps", "create", "shop", "img"]).status.success());
        assert!(
            ws.tuber(&["apps", "exclude", "shop", "Deployment/worker", "Service/admin"])
                .status
                .success()
        );
        assert!(
            ws.tuber(&["apps", "exclude", "shop", "Service/admin", "--remove"])
                .status
                .success()
        );
        assert!(
            ws.tuber(&["apps", "set-var", "shop", "greeting=hi", "replicas=3"])
                .status
                .success()
        );
        assert!(
            ws.tuber(&["apps", "set-var", "shop", "--unset", "replicas"])
                .status
                .success()
        );

        let record = std::fs::read_to_string(ws.dir.path().join("apps/shop.json")).unwrap();
        let app: serde_json::Value = serde_json::from_str(&record).unwrap();
        assert_eq!(
            app["excludedResources"],
            serde_json::json!([{"kind": "Deployment", "name": "worker"}])
        );
        assert_eq!(app["vars"], serde_json::json!({"greeting": "hi"}));
    }

    #[test]
    fn test_bad_exclusion_is_input_error() {
        let ws = Workspace::new();
        assert!(ws.tuber(&["apps", "create", "shop", "img"]).status.success());
        let output = ws.tuber(&["apps", "exclude", "shop", "worker"]);
        assert_eq!(output.status.code(), Some(2));
    }
}

mod release_command {
    use super::*;

    #[test]
    fn test_paused_app_is_skipped() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        assert!(ws.tuber(&["apps", "create", "shop", "img"]).status.success());
        assert!(ws.tuber(&["apps", "pause", "shop"]).status.success());

        let output = ws.tuber(&["release", "shop", "--digest", "d", "--manifests", &demo]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("paused"));

        assert!(ws.tuber(&["apps", "resume", "shop"]).status.success());
        let show = stdout(&ws.tuber(&["apps", "show", "shop"]));
        assert!(!show.contains("Paused"));
    }

    #[test]
    fn test_unknown_app() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        let output = ws.tuber(&["release", "ghost", "--digest", "d", "--manifests", &demo]);
        assert_eq!(output.status.code(), Some(8));
        assert!(stderr(&output).contains("apps create ghost"));
    }

    #[test]
    fn test_cluster_failure_fails_release_and_keeps_state() {
        let ws = Workspace::new();
        let demo = fixture("demo-app");
        assert!(ws.tuber(&["apps", "create", "shop", "img"]).status.success());
        assert!(ws.tuber(&["apps", "set-var", "shop", "greeting=hi"]).status.success());

        let output = ws.tuber(&["release", "shop", "--digest", "d", "--manifests", &demo]);
        assert_eq!(output.status.code(), Some(6), "stderr: {}", stderr(&output));

        let record = std::fs::read_to_string(ws.dir.path().join("apps/shop.json")).unwrap();
        let app: serde_json::Value = serde_json::from_str(&record).unwrap();
        assert!(app["state"]["current"].as_array().is_none_or(|c| c.is_empty()));
    }
}
