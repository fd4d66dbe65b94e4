// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Template conditions: `{{ target.data.enabled == "yes" }}`.

use super::parse_bool;
use crate::constants::TARGET_KEY;
use crate::glue_errors::GlueError;
use crate::templating::TemplateRenderer;
use serde_json::Value as JsonValue;

/// Render `template` with the data context plus `target`; met iff it renders `true`.
///
/// # Errors
///
/// Returns [`GlueError::Render`] if the template fails to render.
pub fn is_met(
    renderer: &TemplateRenderer,
    template: &str,
    target: Option<&JsonValue>,
    data: &JsonValue,
) -> Result<bool, GlueError> {
    let mut context = match data {
        JsonValue::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    context.insert(
        TARGET_KEY.to_string(),
        target.cloned().unwrap_or(JsonValue::Null),
    );
    let output = renderer.render(template, &JsonValue::Object(context))?;
    Ok(parse_bool(&output))
}
