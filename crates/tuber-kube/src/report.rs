//! Error reporting
//!
//! Release failures are handed to an [`ErrorReporter`] together with a [`Scope`]
//! of key/value context (app name, resource kind and name, stage). Reporting is a
//! side channel: it never fails the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Key/value context stamped onto reported errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope(BTreeMap<String, String>);

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, overwriting any existing value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Combine two scopes; keys from `other` win
    pub fn merged(&self, other: &Scope) -> Self {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Set the `context` key
    pub fn with_context(self, context: impl Into<String>) -> Self {
        self.with("context", context)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

/// Sink for structured errors
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync), scope: &Scope);
}

/// Reports errors as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync), scope: &Scope) {
        tracing::error!(error = %error, scope = %scope, "release error reported");
    }
}

/// A reported error, captured by [`MemoryReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub message: String,
    pub scope: Scope,
}

/// In-memory reporter for tests
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    reports: Arc<RwLock<Vec<ReportedError>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ReportedError> {
        self.reports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reports whose `context` scope key equals `context`
    pub fn with_context(&self, context: &str) -> Vec<ReportedError> {
        self.reports()
            .into_iter()
            .filter(|r| r.scope.get("context") == Some(context))
            .collect()
    }
}

impl ErrorReporter for MemoryReporter {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync), scope: &Scope) {
        self.reports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(ReportedError {
                message: error.to_string(),
                scope: scope.clone(),
            });
    }
}
