//! Manifest resolution for an image digest
//!
//! Releases are built from the `.tuber/` directory shipped with an image:
//!
//! ```text
//! .tuber/
//!   *.yaml              release manifests
//!   prerelease/*.yaml   run-to-completion Pods
//!   postrelease/*.yaml  canary stage
//! ```
//!
//! Files in each group are read in name order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tuber_core::AppYamls;

use crate::error::{KubeError, Result};

/// Name of the manifest directory inside an image
pub const TUBER_DIR: &str = ".tuber";

#[async_trait]
pub trait ManifestResolver: Send + Sync {
    /// Raw manifest groups and tags for `repository` at `digest`
    async fn resolve(&self, repository: &str, digest: &str) -> Result<AppYamls>;
}

#[async_trait]
impl<T: ManifestResolver + ?Sized> ManifestResolver for Arc<T> {
    async fn resolve(&self, repository: &str, digest: &str) -> Result<AppYamls> {
        (**self).resolve(repository, digest).await
    }
}

/// Reads manifests from an extracted `.tuber/` directory on disk
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
    tags: Vec<String>,
}

impl DirectoryResolver {
    /// `root` contains the `.tuber/` directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tags: Vec::new(),
        }
    }

    /// Tags reported for every resolved digest
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    fn tuber_dir(&self) -> PathBuf {
        self.root.join(TUBER_DIR)
    }
}

/// Contents of every `.yaml`/`.yml` file directly inside `dir`, by file name
fn read_group(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| std::fs::read_to_string(p).map_err(KubeError::from))
        .collect()
}

#[async_trait]
impl ManifestResolver for DirectoryResolver {
    async fn resolve(&self, repository: &str, digest: &str) -> Result<AppYamls> {
        let dir = self.tuber_dir();
        if !dir.is_dir() {
            return Err(KubeError::ManifestsNotFound {
                repository: repository.to_string(),
                digest: digest.to_string(),
            });
        }

        let yamls = AppYamls {
            prerelease: read_group(&dir.join("prerelease"))?,
            release: read_group(&dir)?,
            postrelease: read_group(&dir.join("postrelease"))?,
            tags: self.tags.clone(),
        };
        tracing::debug!(
            path = %dir.display(),
            prerelease = yamls.prerelease.len(),
            release = yamls.release.len(),
            postrelease = yamls.postrelease.len(),
            "resolved manifests"
        );
        Ok(yamls)
    }
}

/// Serves fixed manifests keyed by digest
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    manifests: Arc<RwLock<HashMap<String, AppYamls>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, digest: &str, yamls: AppYamls) {
        self.manifests
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(digest.to_string(), yamls);
    }
}

#[async_trait]
impl ManifestResolver for StaticResolver {
    async fn resolve(&self, repository: &str, digest: &str) -> Result<AppYamls> {
        self.manifests
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(digest)
            .cloned()
            .ok_or_else(|| KubeError::ManifestsNotFound {
                repository: repository.to_string(),
                digest: digest.to_string(),
            })
    }
}
