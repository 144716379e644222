//! Template engine based on MiniJinja

use std::borrow::Cow;
use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;

/// Separator used when joining the documents of one manifest group
pub const DOCUMENT_SEPARATOR: &str = "\n---\n";

/// `{{.var}}` / `{{- .var -}}` placeholders from older manifests
static LEGACY_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(-?)\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*(-?)\}\}")
        .expect("legacy placeholder pattern is valid")
});

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
    legacy_placeholders: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            strict_mode: true,
            legacy_placeholders: true,
        }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Accept `{{.var}}` placeholders alongside `{{ var }}`
    pub fn legacy_placeholders(mut self, enabled: bool) -> Self {
        self.legacy_placeholders = enabled;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            strict_mode: self.strict_mode,
            legacy_placeholders: self.legacy_placeholders,
        }
    }
}

/// Interpolates manifest text with a flat string variable map
pub struct Engine {
    strict_mode: bool,
    legacy_placeholders: bool,
}

impl Default for Engine {
    fn default() -> Self {
        EngineBuilder::new().build()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(UndefinedBehavior::Lenient);
        }
        // Manifests are stored byte-for-byte, keep their final newline
        env.set_keep_trailing_newline(true);

        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);

        env
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        vars: &BTreeMap<String, String>,
        template_name: &str,
    ) -> Result<String> {
        let source = if self.legacy_placeholders {
            rewrite_legacy_placeholders(template)
        } else {
            Cow::Borrowed(template)
        };

        let known: Vec<&str> = vars.keys().map(String::as_str).collect();
        let to_error = |e: minijinja::Error| {
            EngineError::Template(TemplateError::from_minijinja(
                e,
                template_name,
                &source,
                &known,
            ))
        };

        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), source.to_string())
            .map_err(to_error)?;
        let tmpl = env.get_template(template_name).map_err(to_error)?;

        tmpl.render(vars).map_err(to_error)
    }

    /// Join a group of manifest documents and render them as one template
    ///
    /// An empty group renders to an empty string.
    pub fn render_group(
        &self,
        documents: &[String],
        vars: &BTreeMap<String, String>,
        group_name: &str,
    ) -> Result<String> {
        if documents.is_empty() {
            return Ok(String::new());
        }
        let joined = documents.join(DOCUMENT_SEPARATOR);
        self.render_string(&joined, vars, group_name)
    }
}

/// Rewrite `{{.var}}` into `{{ var }}`, keeping whitespace-trim markers
pub fn rewrite_legacy_placeholders(template: &str) -> Cow<'_, str> {
    LEGACY_PLACEHOLDER.replace_all(template, "{{${1} ${2} ${3}}}")
}
