//! File-based app store
//!
//! One `<name>.json` per app under a base directory. Useful for local
//! development and for running releases without a control namespace.

use std::path::PathBuf;

use async_trait::async_trait;
use tuber_core::App;

use super::{AppStore, decode_app, encode_app};
use crate::error::{KubeError, Result};

pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create the store, creating `base_dir` if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn app_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", name))
    }

    /// Names of every stored app, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl AppStore for FileStore {
    async fn get(&self, name: &str) -> Result<App> {
        let path = self.app_path(name);
        if !path.exists() {
            return Err(KubeError::AppNotFound(name.to_string()));
        }
        let data = tokio::fs::read_to_string(&path).await?;
        decode_app(name, &data)
    }

    async fn save(&self, app: &App) -> Result<()> {
        if app.name.is_empty() || app.name.contains(['/', '\\']) {
            return Err(KubeError::Storage(format!(
                "invalid app name '{}'",
                app.name
            )));
        }

        let path = self.app_path(&app.name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encode_app(app)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
