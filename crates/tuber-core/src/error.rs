//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid encoded manifest for {kind}/{name}: {message}")]
    InvalidEncoding {
        kind: String,
        name: String,
        message: String,
    },

    #[error("Invalid resource reference '{value}', expected Kind/name")]
    InvalidResourceRef { value: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
