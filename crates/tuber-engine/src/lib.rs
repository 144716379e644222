//! Tuber Engine - manifest interpolation
//!
//! Renders raw manifest text with MiniJinja. Variables are a flat string map
//! (image digest, app name, cluster defaults, app vars); referencing an unknown
//! variable is an error. Older `{{.var}}` placeholders are accepted too.

pub mod engine;
pub mod error;
pub mod filters;

pub use engine::{DOCUMENT_SEPARATOR, Engine, EngineBuilder, rewrite_legacy_placeholders};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
