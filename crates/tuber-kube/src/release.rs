//! The release pipeline
//!
//! One call to [`Releaser::release`] drives a single supervised release of one
//! app:
//!
//! ```text
//! load app -> resolve -> render -> prerelease -> apply configs -> apply workloads
//!   -> watch workloads -> apply postrelease -> watch postrelease -> cleanup -> persist
//! ```
//!
//! Any failure after the first apply rolls back everything applied so far and
//! re-watches the reverted workloads. Rollback and cleanup errors are reported
//! on the side; only the error that stopped the release is returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::Instrument;
use tuber_core::{App, ClusterData, ManagedResource, ReleaseTimings, ResourceRef, TuberConfig};
use tuber_engine::Engine;

use crate::cluster::ClusterClient;
use crate::error::ReleaseError;
use crate::manifest::{RenderedResource, Renderer, ResourceCollection};
use crate::monitor::{ExternalMonitor, SentryMonitor};
use crate::notify::{LogNotifier, Notice, Notifier, SlackNotifier};
use crate::prerelease::PrereleaseRunner;
use crate::reconcile::{Reconciler, persist_state};
use crate::report::{ErrorReporter, LogReporter, Scope};
use crate::resolver::ManifestResolver;
use crate::rollback::Rollback;
use crate::store::AppStore;
use crate::watch::Watcher;

/// What a successful release did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Configs, workloads and postrelease resources, in apply order
    pub applied: Vec<ResourceRef>,
    /// Stale resources deleted by cleanup
    pub removed: Vec<ResourceRef>,
    pub tags: Vec<String>,
    /// Workloads whose rollout was waited on
    pub watched: Vec<ResourceRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released(ReleaseSummary),
    /// The app is paused; nothing was touched
    Paused,
}

/// Runs releases against one cluster
pub struct Releaser {
    cluster: Arc<dyn ClusterClient>,
    store: Arc<dyn AppStore>,
    resolver: Arc<dyn ManifestResolver>,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ErrorReporter>,
    monitor: Arc<dyn ExternalMonitor>,
    engine: Engine,
    timings: ReleaseTimings,
    control_namespace: String,
    monitor_credential: Option<String>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Releaser {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn AppStore>,
        resolver: Arc<dyn ManifestResolver>,
    ) -> Self {
        Self {
            cluster,
            store,
            resolver,
            notifier: Arc::new(LogNotifier),
            reporter: Arc::new(LogReporter),
            monitor: Arc::new(SentryMonitor::default()),
            engine: Engine::default(),
            timings: ReleaseTimings::default(),
            control_namespace: "tuber".to_string(),
            monitor_credential: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build a releaser with timings, Slack and monitor settings from `config`
    pub fn from_config(
        config: &TuberConfig,
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn AppStore>,
        resolver: Arc<dyn ManifestResolver>,
    ) -> Self {
        Self::new(cluster, store, resolver)
            .with_timings(config.timings.clone())
            .with_control_namespace(config.control_namespace.clone())
            .with_monitor(SentryMonitor::new(config.timings.monitor_interval))
            .with_monitor_credential(config.monitor.bearer_token.clone())
            .with_notifier(SlackNotifier::new(config.slack.clone()))
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn with_monitor(mut self, monitor: impl ExternalMonitor + 'static) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn with_timings(mut self, timings: ReleaseTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Apps with this name are applied but never watched
    pub fn with_control_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.control_namespace = namespace.into();
        self
    }

    pub fn with_monitor_credential(mut self, credential: Option<String>) -> Self {
        self.monitor_credential = credential;
        self
    }

    /// Release `digest` for `app`
    ///
    /// The stored copy of the app is authoritative: it is re-read before the
    /// paused check and supplies the cached state used for rollback. Releases
    /// of the same app through one `Releaser` are serialized.
    pub async fn release(
        &self,
        app: &App,
        digest: &str,
        cluster: &ClusterData,
    ) -> Result<ReleaseOutcome, ReleaseError> {
        let lock = self.app_lock(&app.name);
        let _guard = lock.lock().await;

        let span = tracing::info_span!("release", app = %app.name, digest = %digest);
        self.run(app, digest, cluster).instrument(span).await
    }

    fn app_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    async fn run(
        &self,
        requested: &App,
        digest: &str,
        cluster: &ClusterData,
    ) -> Result<ReleaseOutcome, ReleaseError> {
        let scope = Scope::new()
            .with("app", requested.name.clone())
            .with("digest", digest);

        let app = match self.store.get(&requested.name).await {
            Ok(app) => app,
            Err(e) => return Err(self.abort(ReleaseError::load_state(e), &scope, requested).await),
        };

        if app.paused {
            tracing::info!("app is paused, skipping release");
            self.notify(&app, Notice::Paused { app: app.name.clone() })
                .await;
            return Ok(ReleaseOutcome::Paused);
        }

        tracing::info!("release starting");
        self.notify(
            &app,
            Notice::Started {
                app: app.name.clone(),
                digest: digest.to_string(),
            },
        )
        .await;

        let yamls = match self.resolver.resolve(&app.image_tag, digest).await {
            Ok(yamls) => yamls,
            Err(e) => {
                let error = self.report(ReleaseError::resolve(e), &scope);
                self.notify(&app, Notice::ManifestsNotFound { app: app.name.clone() })
                    .await;
                return Err(error);
            }
        };

        let vars = app.interpolation_vars(digest, cluster);
        let collection =
            match Renderer::new(&self.engine, &vars).render(&yamls, &app.excluded_resources) {
                Ok(collection) => collection,
                Err(e) => return Err(self.abort(e, &scope, &app).await),
            };

        self.execute(&app, collection, yamls.tags, &scope).await
    }

    async fn execute(
        &self,
        app: &App,
        collection: ResourceCollection,
        tags: Vec<String>,
        scope: &Scope,
    ) -> Result<ReleaseOutcome, ReleaseError> {
        let namespace = app.name.as_str();
        let cached = &app.state.current;
        let watcher = self.watcher_for(app);

        if !collection.prerelease.is_empty() {
            tracing::debug!(pods = collection.prerelease.len(), "prerelease starting");
            let runner = PrereleaseRunner::new(
                self.cluster.as_ref(),
                namespace,
                self.timings.prerelease_timeout,
                self.timings.prerelease_poll,
            );
            if let Err(e) = runner.run(&collection.prerelease).await {
                return Err(self.abort(e, scope, app).await);
            }
            tracing::debug!("prerelease complete");
        }

        let mut applied = Vec::new();

        if let Err(e) = self.apply_all(&collection.configs, namespace, &mut applied).await {
            return Err(self.fail(e, &applied, cached, &watcher, scope, app).await);
        }
        if let Err(e) = self.apply_all(&collection.workloads, namespace, &mut applied).await {
            return Err(self.fail(e, &applied, cached, &watcher, scope, app).await);
        }
        if let Err(e) = watcher.watch_workloads(&collection.workloads).await {
            return Err(self.fail(e, &applied, cached, &watcher, scope, app).await);
        }

        if !collection.postrelease.is_empty() {
            self.notify(app, Notice::CanaryStarting { app: app.name.clone() })
                .await;
            if let Err(e) = self
                .apply_all(&collection.postrelease, namespace, &mut applied)
                .await
            {
                return Err(self.fail(e, &applied, cached, &watcher, scope, app).await);
            }
            if let Err(e) = watcher.watch_workloads(&collection.postrelease).await {
                return Err(self.fail(e, &applied, cached, &watcher, scope, app).await);
            }
            self.notify(app, Notice::CanaryDeployed { app: app.name.clone() })
                .await;
        }

        let released: Vec<ManagedResource> =
            collection.released().map(RenderedResource::to_managed).collect();

        let cleanup = Reconciler::new(self.cluster.as_ref(), namespace)
            .cleanup(cached, &released)
            .await;
        for e in cleanup.errors {
            self.report(e, scope);
        }

        if let Err(e) = persist_state(self.store.as_ref(), &app.name, released, tags.clone()).await {
            let error = self.report(e, scope);
            self.notify(
                app,
                Notice::RollbackUnsafe {
                    app: app.name.clone(),
                    error: error.to_string(),
                },
            )
            .await;
            return Err(error);
        }

        tracing::info!(
            applied = applied.len(),
            removed = cleanup.removed.len(),
            "release complete"
        );
        self.notify(app, Notice::Complete { app: app.name.clone() })
            .await;

        let watched = watcher
            .watched(&collection.workloads)
            .into_iter()
            .chain(watcher.watched(&collection.postrelease))
            .map(RenderedResource::resource_ref)
            .collect();

        Ok(ReleaseOutcome::Released(ReleaseSummary {
            applied: applied.iter().map(RenderedResource::resource_ref).collect(),
            removed: cleanup.removed,
            tags,
            watched,
        }))
    }

    fn watcher_for(&self, app: &App) -> Watcher {
        let self_deploy = app.name == self.control_namespace;
        if self_deploy {
            tracing::debug!("control namespace release, rollout watching disabled");
        }
        Watcher::new(self.cluster.clone(), self.monitor.clone(), app.name.clone())
            .with_credential(self.monitor_credential.clone())
            .with_timeouts(self.timings.rollout_timeout, self.timings.rollback_timeout)
            .with_monitors(!app.review_app)
            .with_watching(!self_deploy)
    }

    /// Apply in order, recording each success; stops at the first failure
    async fn apply_all(
        &self,
        resources: &[RenderedResource],
        namespace: &str,
        applied: &mut Vec<RenderedResource>,
    ) -> Result<(), ReleaseError> {
        for resource in resources {
            let span = tracing::info_span!(
                "apply",
                resource_kind = %resource.kind,
                resource_name = %resource.name
            );
            self.cluster
                .apply(&resource.manifest, namespace)
                .instrument(span.clone())
                .await
                .map_err(|e| span.in_scope(|| ReleaseError::apply(resource.resource_ref(), e)))?;
            applied.push(resource.clone());
        }
        Ok(())
    }

    /// Roll back `applied`, then report and announce the failure
    async fn fail(
        &self,
        error: ReleaseError,
        applied: &[RenderedResource],
        cached: &[ManagedResource],
        watcher: &Watcher,
        scope: &Scope,
        app: &App,
    ) -> ReleaseError {
        let error = self.report(error, scope);

        if !applied.is_empty() {
            tracing::warn!(resources = applied.len(), "rolling back");
            let outcome = Rollback::new(self.cluster.as_ref(), &app.name, cached)
                .run(applied)
                .await;
            for e in outcome.errors {
                self.report(e, scope);
            }
            for e in watcher.watch_rollback(&outcome.reverted).await {
                self.report(e, scope);
            }
        }

        self.announce_failure(&error, app).await;
        error
    }

    /// Report and announce a failure that needs no rollback
    async fn abort(&self, error: ReleaseError, scope: &Scope, app: &App) -> ReleaseError {
        let error = self.report(error, scope);
        self.announce_failure(&error, app).await;
        error
    }

    async fn announce_failure(&self, error: &ReleaseError, app: &App) {
        let notice = if error.is_monitor_failure() {
            Notice::MonitorFailed {
                app: app.name.clone(),
                error: error.to_string(),
            }
        } else {
            Notice::Failed {
                app: app.name.clone(),
                error: error.to_string(),
            }
        };
        self.notify(app, notice).await;
    }

    fn report(&self, error: ReleaseError, scope: &Scope) -> ReleaseError {
        let error = error.with_base_scope(scope);
        error.log();
        self.reporter.report(&error, &error.scope);
        error
    }

    async fn notify(&self, app: &App, notice: Notice) {
        self.notifier.notify(&notice, app.channel()).await;
    }
}
