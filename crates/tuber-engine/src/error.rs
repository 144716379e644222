//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error in {}: {}", .0.name(), .0.message)]
    Template(#[from] TemplateError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Category of a template failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    SyntaxError,
    Other,
}

/// Template error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(tuber::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Build from a MiniJinja error, listing the known variables for undefined lookups
    pub fn from_minijinja(
        err: minijinja::Error,
        template_name: &str,
        template_source: &str,
        known_vars: &[&str],
    ) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
            minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
            _ => TemplateErrorKind::Other,
        };

        let message = err
            .to_string()
            .replace("undefined value", "undefined variable");
        let span = err
            .line()
            .and_then(|line| calculate_span(template_source, line));

        let suggestion = match kind {
            TemplateErrorKind::UndefinedVariable if !known_vars.is_empty() => Some(format!(
                "available variables: {}",
                known_vars.join(", ")
            )),
            TemplateErrorKind::UnknownFilter => {
                Some("available filters include b64encode, b64decode, quote, lower".to_string())
            }
            _ => None,
        };

        Self {
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion,
        }
    }

    pub fn name(&self) -> &str {
        self.src.name()
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

/// Span covering the whole of a 1-based line
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}
