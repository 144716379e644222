//! Persisted release state
//!
//! Each successful release records the exact manifests it applied so the next
//! release can roll back to them and remove anything that was dropped.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::app::ResourceRef;
use crate::error::{CoreError, Result};

/// A resource applied by a successful release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub kind: String,
    pub name: String,
    /// Base64 of the rendered manifest text
    pub encoded: String,
}

impl ManagedResource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, manifest: &str) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            encoded: STANDARD.encode(manifest.as_bytes()),
        }
    }

    /// Decode the stored manifest text
    pub fn manifest(&self) -> Result<String> {
        let bytes = STANDARD
            .decode(self.encoded.as_bytes())
            .map_err(|e| self.invalid(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| self.invalid(e.to_string()))
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.kind, &self.name)
    }

    /// Same kind and name
    pub fn same_object(&self, other: &ManagedResource) -> bool {
        self.kind == other.kind && self.name == other.name
    }

    fn invalid(&self, message: String) -> CoreError {
        CoreError::InvalidEncoding {
            kind: self.kind.clone(),
            name: self.name.clone(),
            message,
        }
    }
}

/// Last two released resource sets for an app
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default)]
    pub current: Vec<ManagedResource>,
    #[serde(default)]
    pub previous: Vec<ManagedResource>,
}

impl State {
    /// Shift `current` into `previous` and record a new `current`
    pub fn advance(&mut self, released: Vec<ManagedResource>) {
        self.previous = std::mem::replace(&mut self.current, released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_decodes() {
        let yaml = "kind: ConfigMap\nmetadata:\n  name: cfg\n";
        let res = ManagedResource::new("ConfigMap", "cfg", yaml);
        assert_ne!(res.encoded, yaml);
        assert_eq!(res.manifest().unwrap(), yaml);
    }

    #[test]
    fn test_invalid_encoding() {
        let res = ManagedResource {
            kind: "ConfigMap".to_string(),
            name: "cfg".to_string(),
            encoded: "not base64!!".to_string(),
        };
        let err = res.manifest().unwrap_err();
        assert!(err.to_string().contains("ConfigMap/cfg"));
    }

    #[test]
    fn test_advance_shifts_current() {
        let mut state = State::default();
        state.advance(vec![ManagedResource::new("Deployment", "a", "x")]);
        assert!(state.previous.is_empty());

        state.advance(vec![ManagedResource::new("Deployment", "b", "y")]);
        assert_eq!(state.previous[0].name, "a");
        assert_eq!(state.current[0].name, "b");
        assert_eq!(state.current.len(), 1);
    }

    #[test]
    fn test_state_serialization_field_names() {
        let mut state = State::default();
        state.advance(vec![ManagedResource::new("Service", "web", "y")]);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["current"][0]["kind"], "Service");
        assert!(json["previous"].as_array().unwrap().is_empty());
    }
}
