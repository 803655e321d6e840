//! Tool synthesis: naming, descriptions, MCP conversion.

use crate::semantics::annotations_for_method;
use crate::translate::{FieldBinding, TranslatedOperation};
use regex::Regex;
use reqwest::Method;
use rmcp::model::{JsonObject, Tool};
use serde_json::Value;
use std::sync::Arc;

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_CHARS: usize = 1024;

/// One MCP-exposed tool derived from one OpenAPI operation.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Globally unique tool name (the registry may apply an api suffix).
    pub name: String,
    pub description: String,
    pub method: Method,
    /// OpenAPI path template, braces intact (`/gene/{geneid}`).
    pub path: String,
    /// Registry id of the owning API.
    pub api_id: String,
    /// `operationId` as declared, whether or not it was usable as a name.
    pub operation_id: Option<String>,
    pub input_schema: Value,
    pub bindings: Vec<FieldBinding>,
}

impl ToolDefinition {
    /// Build a tool definition from a translated operation.
    ///
    /// The name comes from `operationId` when it already fits the allowed
    /// character set and length; otherwise it is synthesized from the
    /// method and path. A missing summary/description never fails
    /// synthesis.
    #[must_use]
    pub fn synthesize(
        api_id: &str,
        method: Method,
        path: &str,
        operation: &Value,
        translated: TranslatedOperation,
    ) -> Self {
        let operation_id = operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let name = operation_id
            .as_deref()
            .filter(|id| is_valid_tool_name(id))
            .map_or_else(
                || generate_canonical_name(method.as_str(), path),
                str::to_string,
            );

        let description = operation
            .get("summary")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                operation
                    .get("description")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
            })
            .map_or_else(
                || format!("Calls {} {}", method.as_str(), path),
                |s| truncate_chars(s.trim(), MAX_DESCRIPTION_CHARS),
            );

        Self {
            name,
            description,
            method,
            path: path.to_string(),
            api_id: api_id.to_string(),
            operation_id,
            input_schema: translated.input_schema,
            bindings: translated.bindings,
        }
    }

    /// Deterministic collision suffix: the first 8 characters of the owning
    /// API's registry id.
    #[must_use]
    pub fn api_suffixed_name(&self) -> String {
        let short: String = self.api_id.chars().take(8).collect();
        format!("{}_{short}", self.name)
    }

    /// Convert to the MCP wire model, with method-derived annotations.
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let schema_obj = self
            .input_schema
            .as_object()
            .cloned()
            .unwrap_or_else(JsonObject::new);
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::new(schema_obj),
        );
        tool.annotations = Some(annotations_for_method(&self.method));
        tool
    }
}

fn is_valid_tool_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_NAME_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Synthesize a tool name from method and path, e.g.
/// `GET /gene/{geneid}` -> `get_gene_geneid`.
fn generate_canonical_name(method: &str, path: &str) -> String {
    let mut name = format!("{}_{}", method.to_lowercase(), path.trim_start_matches('/'));

    // {param} -> _param
    let re = Regex::new(r"\{([^}]+)\}").unwrap();
    name = re.replace_all(&name, "_$1").to_string();

    let re = Regex::new(r"[^a-zA-Z0-9]+").unwrap();
    name = re.replace_all(&name, "_").to_string();

    let re = Regex::new(r"_+").unwrap();
    name = re.replace_all(&name, "_").to_string();

    name = name.trim_matches('_').to_string();

    if name.len() > MAX_NAME_LEN {
        name.truncate(MAX_NAME_LEN);
        name = name.trim_end_matches('_').to_string();
    }

    name
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
