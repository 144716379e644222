//! Mock app store for testing

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tuber_core::App;

use super::AppStore;
use crate::error::{KubeError, Result};

/// In-memory app store
#[derive(Clone, Default)]
pub struct MockAppStore {
    apps: Arc<RwLock<HashMap<String, App>>>,
    counts: Arc<RwLock<StoreCounts>>,
    fail_saves: Arc<RwLock<Option<String>>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreCounts {
    pub gets: usize,
    pub saves: usize,
}

impl MockAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated apps
    pub fn with_apps(apps: impl IntoIterator<Item = App>) -> Self {
        let store = Self::new();
        {
            let mut map = store.apps.write().unwrap_or_else(|e| e.into_inner());
            for app in apps {
                map.insert(app.name.clone(), app);
            }
        }
        store
    }

    pub fn counts(&self) -> StoreCounts {
        self.counts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make every subsequent save fail with `message`
    pub fn fail_saves(&self, message: &str) {
        *self.fail_saves.write().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    /// Read an app without counting the access
    pub fn app(&self, name: &str) -> Option<App> {
        self.apps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Replace a record without counting the access
    pub fn put(&self, app: App) {
        self.apps
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app.name.clone(), app);
    }
}

#[async_trait]
impl AppStore for MockAppStore {
    async fn get(&self, name: &str) -> Result<App> {
        self.counts.write().unwrap_or_else(|e| e.into_inner()).gets += 1;
        self.app(name)
            .ok_or_else(|| KubeError::AppNotFound(name.to_string()))
    }

    async fn save(&self, app: &App) -> Result<()> {
        self.counts.write().unwrap_or_else(|e| e.into_inner()).saves += 1;
        if let Some(message) = self
            .fail_saves
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(KubeError::Storage(message));
        }
        self.put(app.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_failures() {
        let store = MockAppStore::with_apps([App::new("shop", "")]);
        store.get("shop").await.unwrap();
        assert!(store.get("other").await.is_err());

        store.fail_saves("disk full");
        let err = store.save(&App::new("shop", "x")).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));

        assert_eq!(store.counts(), StoreCounts { gets: 2, saves: 1 });
        assert_eq!(store.app("shop").unwrap().image_tag, "");
    }
}
