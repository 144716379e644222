//! ConfigMap-backed app store

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, Patch, PatchParams, PostParams};
use tuber_core::App;

use super::{AppStore, decode_app, encode_app};
use crate::error::{KubeError, Result};

/// Data key holding the JSON record
const RECORD_KEY: &str = "app";

/// Stores each app in its own ConfigMap, `<prefix>-<app>`
///
/// A ConfigMap is capped at 1 MiB and each record carries two manifest sets.
pub struct ConfigMapStore {
    client: Client,
    namespace: String,
    prefix: String,
}

impl ConfigMapStore {
    /// Connect with the default kubeconfig
    pub async fn new(namespace: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, namespace, prefix))
    }

    pub fn with_client(
        client: Client,
        namespace: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            prefix: prefix.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn object_name(&self, app: &str) -> String {
        format!("{}-{}", self.prefix, app)
    }

    fn build_config_map(&self, app: &str, value: String) -> ConfigMap {
        let labels = BTreeMap::from([
            (
                "app.kubernetes.io/managed-by".to_string(),
                "tuber".to_string(),
            ),
            ("app.kubernetes.io/instance".to_string(), app.to_string()),
        ]);

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.object_name(app)),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(RECORD_KEY.to_string(), value)])),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AppStore for ConfigMapStore {
    async fn get(&self, name: &str) -> Result<App> {
        let config_map = self
            .api()
            .get_opt(&self.object_name(name))
            .await?
            .ok_or_else(|| KubeError::AppNotFound(name.to_string()))?;

        let data = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(RECORD_KEY))
            .ok_or_else(|| KubeError::AppNotFound(name.to_string()))?;

        decode_app(name, data)
    }

    async fn save(&self, app: &App) -> Result<()> {
        let encoded = encode_app(app)?;
        let api = self.api();
        let object = self.object_name(&app.name);

        if api.get_opt(&object).await?.is_none() {
            let config_map = self.build_config_map(&app.name, encoded.clone());
            match api.create(&PostParams::default(), &config_map).await {
                Ok(_) => {
                    tracing::debug!(app = %app.name, config_map = %object, "created app record");
                    return Ok(());
                }
                // Lost a race with another writer; fall through to patch
                Err(kube::Error::Api(resp)) if resp.code == 409 => {}
                Err(e) => return Err(e.into()),
            }
        }

        let patch = serde_json::json!({ "data": { RECORD_KEY: encoded } });
        api.patch(&object, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        tracing::debug!(app = %app.name, config_map = %object, "saved app");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE: &str = "/api/v1/namespaces/tuber/configmaps";

    fn store(server: &MockServer) -> ConfigMapStore {
        let config = kube::Config::new(server.uri().parse().unwrap());
        let client = Client::try_from(config).unwrap();
        ConfigMapStore::with_client(client, "tuber", "tuber-apps")
    }

    fn not_found() -> ResponseTemplate {
        ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "configmaps not found",
            "reason": "NotFound",
            "code": 404
        }))
    }

    fn stored(name: &str, record: &App) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "tuber" },
            "data": { "app": encode_app(record).unwrap() }
        })
    }

    #[tokio::test]
    async fn test_build_config_map_per_app() {
        let server = MockServer::start().await;
        let store = store(&server);
        let cm = store.build_config_map("shop", "{}".to_string());
        assert_eq!(cm.metadata.name.as_deref(), Some("tuber-apps-shop"));
        assert_eq!(cm.data.unwrap().keys().collect::<Vec<_>>(), vec!["app"]);
        assert_eq!(
            cm.metadata.labels.unwrap().get("app.kubernetes.io/instance").map(String::as_str),
            Some("shop")
        );
    }

    #[tokio::test]
    async fn test_get_reads_the_apps_own_config_map() {
        let server = MockServer::start().await;
        let app = App::new("shop", "gcr.io/acme/shop:main");
        Mock::given(method("GET"))
            .and(path(format!("{}/tuber-apps-shop", BASE)))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored("tuber-apps-shop", &app)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/tuber-apps-ghost", BASE)))
            .respond_with(not_found())
            .mount(&server)
            .await;

        let store = store(&server);
        assert_eq!(store.get("shop").await.unwrap(), app);
        assert!(matches!(
            store.get("ghost").await,
            Err(KubeError::AppNotFound(name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_save_creates_a_config_map_for_a_new_app() {
        let server = MockServer::start().await;
        let app = App::new("shop", "img");
        Mock::given(method("GET"))
            .and(path(format!("{}/tuber-apps-shop", BASE)))
            .respond_with(not_found())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(BASE))
            .and(body_partial_json(serde_json::json!({
                "metadata": { "name": "tuber-apps-shop" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(stored("tuber-apps-shop", &app)))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).save(&app).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_patches_only_the_apps_record() {
        let server = MockServer::start().await;
        let app = App::new("shop", "img");
        Mock::given(method("GET"))
            .and(path(format!("{}/tuber-apps-shop", BASE)))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored("tuber-apps-shop", &app)))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/tuber-apps-shop", BASE)))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored("tuber-apps-shop", &app)))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).save(&app).await.unwrap();
    }
}
