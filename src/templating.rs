// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Template rendering for resource templates, names, status patches and conditions.
//!
//! Templates use minijinja syntax and are rendered against a JSON data context:
//!
//! ```text
//! apiVersion: v1
//! kind: ConfigMap
//! metadata:
//!   name: "{{ glueMetadata.name }}-copy"
//! data:
//!   password: "{{ secret.data.password | decodeBase64 }}"
//! ```
//!
//! Two entry points matter:
//!
//! - [`TemplateRenderer::render_yaml`] renders a string template and parses the
//!   output as YAML (used for `resourceTemplate` and `statusPatchTemplate`)
//! - [`TemplateRenderer::render_object`] renders every string leaf of an object
//!   (used for static `resource` and `statusPatch`). A leaf consisting of exactly
//!   one `{{ expression }}` keeps the type of the rendered value, so
//!   `replicas: "{{ parent.spec.replicas }}"` renders to a number.
//!
//! Undefined variables are errors: a template referring to a binding that does
//! not exist fails with [`GlueError::Render`] instead of rendering an empty string.

use crate::glue_errors::GlueError;
use base64::Engine as _;
use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use serde_json::Value as JsonValue;

/// Renders minijinja templates with the base64 filters registered.
#[derive(Clone)]
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_base64(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn decode_base64(value: String) -> Result<String, minijinja::Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| {
            minijinja::Error::new(ErrorKind::InvalidOperation, format!("invalid base64: {e}"))
        })?;
    String::from_utf8(bytes).map_err(|e| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("decoded base64 is not UTF-8: {e}"),
        )
    })
}

impl TemplateRenderer {
    /// Create a renderer with strict undefined handling and base64 filters.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("encodeBase64", encode_base64);
        env.add_filter("decodeBase64", decode_base64);
        Self { env }
    }

    /// Render a template to text.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Render`] on syntax errors or undefined bindings.
    pub fn render(&self, template: &str, data: &JsonValue) -> Result<String, GlueError> {
        self.env
            .render_str(template, Value::from_serialize(data))
            .map_err(|e| GlueError::render("template", e))
    }

    /// Render a string template and parse the result as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Render`] if rendering fails or the output is not valid YAML.
    pub fn render_yaml(&self, template: &str, data: &JsonValue) -> Result<JsonValue, GlueError> {
        let rendered = self.render(template, data)?;
        parse_yaml(&rendered)
    }

    /// Render every string leaf (and map key) of an object template.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Render`] if any leaf fails to render.
    pub fn render_object(
        &self,
        object: &JsonValue,
        data: &JsonValue,
    ) -> Result<JsonValue, GlueError> {
        match object {
            JsonValue::String(s) => self.render_leaf(s, data),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.render_object(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            JsonValue::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    let key = if is_template(key) {
                        self.render(key, data)?
                    } else {
                        key.clone()
                    };
                    rendered.insert(key, self.render_object(value, data)?);
                }
                Ok(JsonValue::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_leaf(&self, leaf: &str, data: &JsonValue) -> Result<JsonValue, GlueError> {
        if !is_template(leaf) {
            return Ok(JsonValue::String(leaf.to_string()));
        }
        let rendered = self.render(leaf, data)?;
        if is_single_expression(leaf) && !rendered.trim().is_empty() {
            if let Ok(typed) = serde_yaml::from_str::<JsonValue>(&rendered) {
                if !typed.is_null() {
                    return Ok(typed);
                }
            }
        }
        Ok(JsonValue::String(rendered))
    }
}

/// Parse YAML (or JSON) text into a JSON value.
///
/// # Errors
///
/// Returns [`GlueError::Render`] if the text is not valid YAML.
pub fn parse_yaml(text: &str) -> Result<JsonValue, GlueError> {
    serde_yaml::from_str::<JsonValue>(text)
        .map_err(|e| GlueError::render("template", format!("rendered output is not valid YAML: {e}")))
}

fn is_template(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

/// True when the whole text is one `{{ ... }}` expression.
fn is_single_expression(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("{{")
        && trimmed.ends_with("}}")
        && trimmed[2..].find("{{").is_none()
        && trimmed.find("}}") == Some(trimmed.len() - 2)
}

#[cfg(test)]
#[path = "templating_tests.rs"]
mod templating_tests;
