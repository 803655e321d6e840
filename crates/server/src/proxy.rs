//! Call-time pipeline: validate, build, execute, map.
//!
//! `invoke` never returns `Err`. Every failure path resolves to a
//! `CallToolResult` with `is_error` set and a structured `errorKind`
//! (`UnknownTool` / `ValidationError` / `UpstreamError` / `TransportError`),
//! so nothing on the invocation path can take the server down.

use crate::config::AuthConfig;
use crate::registry::{RegisteredTool, ToolRegistry};
use crate::retry::RetryPolicy;
use backoff::backoff::Backoff as _;
use rmcp::model::{CallToolResult, Content};
use serde_json::{Map, Value, json};
use smartapi_openapi_tools::FieldLocation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Failure category carried in error results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    UnknownTool,
    ValidationError,
    UpstreamError,
    TransportError,
}

impl CallErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CallErrorKind::UnknownTool => "UnknownTool",
            CallErrorKind::ValidationError => "ValidationError",
            CallErrorKind::UpstreamError => "UpstreamError",
            CallErrorKind::TransportError => "TransportError",
        }
    }
}

/// Executes tool calls against their upstream APIs.
pub struct InvocationProxy {
    registry: Arc<ToolRegistry>,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
}

impl InvocationProxy {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        timeout: Duration,
        retry: RetryPolicy,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            timeout,
            retry,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Invoke `name` with `arguments`.
    ///
    /// Validation failures short-circuit before any HTTP request is built.
    /// Cancelling `cancel` aborts this call's in-flight request only.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let Some(tool) = self.registry.lookup(name) else {
            return error_result(
                CallErrorKind::UnknownTool,
                format!("Tool not found: {name}"),
                None,
            );
        };

        if let Err((message, detail)) = validate_arguments(&tool, arguments) {
            return error_result(CallErrorKind::ValidationError, message, Some(detail));
        }

        let mut parts = build_request_parts(&tool, arguments);
        if let Some(AuthConfig::Query { name, value }) = &tool.target.auth {
            parts.query.push((name.clone(), value.clone()));
        }
        let url = match build_url(&tool.target.base_url, &parts.path, &parts.query) {
            Ok(url) => url,
            Err(message) => return error_result(CallErrorKind::TransportError, message, None),
        };

        // Queue behind the outbound concurrency cap rather than failing.
        let _permit = match Arc::clone(&self.limiter).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return error_result(
                    CallErrorKind::TransportError,
                    "server is shutting down".to_string(),
                    None,
                );
            }
        };

        self.execute(&tool, &parts, &url, cancel).await
    }

    async fn execute(
        &self,
        tool: &RegisteredTool,
        parts: &RequestParts,
        url: &Url,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let method = &tool.definition.method;
        let mut backoff = self.retry.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    return error_result(
                        CallErrorKind::TransportError,
                        "tool call cancelled".to_string(),
                        None,
                    );
                }
                outcome = self.send_once(tool, parts, url.clone()) => outcome,
            };

            match outcome {
                Ok(response) if response.status.is_success() => return success_result(response),
                Ok(response) => {
                    if self.retry.allows(method, attempt, Some(response.status))
                        && let Some(delay) = backoff.next_backoff()
                    {
                        tracing::debug!(
                            tool = %tool.definition.name,
                            status = response.status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis(),
                            "retrying transient upstream status"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return upstream_error(&response);
                }
                Err(message) => {
                    if self.retry.allows(method, attempt, None)
                        && let Some(delay) = backoff.next_backoff()
                    {
                        tracing::debug!(
                            tool = %tool.definition.name,
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %message,
                            "retrying after transport failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return error_result(CallErrorKind::TransportError, message, None);
                }
            }
        }
    }

    async fn send_once(
        &self,
        tool: &RegisteredTool,
        parts: &RequestParts,
        url: Url,
    ) -> Result<UpstreamResponse, String> {
        let mut request = self
            .client
            .request(tool.definition.method.clone(), url)
            .timeout(self.timeout);

        request = apply_auth(request, tool.target.auth.as_ref());
        for (name, value) in &parts.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !parts.cookies.is_empty() {
            let cookie = parts
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(payload) = &parts.body_payload {
            request = request.json(payload);
        } else if !parts.body_fields.is_empty() {
            request = request.json(&parts.body_fields);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read response body: {e}"))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

struct UpstreamResponse {
    status: reqwest::StatusCode,
    content_type: Option<String>,
    body: String,
}

#[derive(Default)]
struct RequestParts {
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    body_fields: Map<String, Value>,
    body_payload: Option<Value>,
}

/// Distribute validated arguments into request parts per the binding table.
fn build_request_parts(tool: &RegisteredTool, arguments: &Value) -> RequestParts {
    let mut parts = RequestParts {
        path: tool.definition.path.clone(),
        ..RequestParts::default()
    };

    for binding in &tool.definition.bindings {
        let Some(value) = arguments.get(&binding.field_name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        match binding.location {
            FieldLocation::Path => {
                let encoded = percent_encode(&value_to_string(value));
                parts.path = parts
                    .path
                    .replace(&format!("{{{}}}", binding.http_name), &encoded);
            }
            FieldLocation::Query => match value {
                // form-style explode: one pair per array element
                Value::Array(items) => {
                    for item in items {
                        parts
                            .query
                            .push((binding.http_name.clone(), value_to_string(item)));
                    }
                }
                other => parts
                    .query
                    .push((binding.http_name.clone(), value_to_string(other))),
            },
            FieldLocation::Header => {
                parts
                    .headers
                    .push((binding.http_name.clone(), value_to_string(value)));
            }
            FieldLocation::Cookie => {
                parts
                    .cookies
                    .push((binding.http_name.clone(), value_to_string(value)));
            }
            FieldLocation::Body => {
                if binding.whole_body {
                    parts.body_payload = Some(value.clone());
                } else {
                    parts
                        .body_fields
                        .insert(binding.http_name.clone(), value.clone());
                }
            }
        }
    }

    if !parts.path.starts_with('/') {
        parts.path = format!("/{}", parts.path);
    }
    parts
}

fn build_url(base_url: &str, path: &str, query: &[(String, String)]) -> Result<Url, String> {
    let joined = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url =
        Url::parse(&joined).map_err(|e| format!("invalid request URL '{joined}': {e}"))?;

    if !query.is_empty() {
        let mut encoded = String::new();
        for (i, (key, value)) in query.iter().enumerate() {
            if i > 0 {
                encoded.push('&');
            }
            encoded.push_str(&percent_encode(key));
            encoded.push('=');
            encoded.push_str(&percent_encode(value));
        }
        url.set_query(Some(&encoded));
    }
    Ok(url)
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    auth: Option<&AuthConfig>,
) -> reqwest::RequestBuilder {
    match auth {
        Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
        Some(AuthConfig::Header { name, value }) => request.header(name.as_str(), value.as_str()),
        Some(AuthConfig::Basic { username, password }) => {
            request.basic_auth(username, Some(password))
        }
        // Query credentials are appended during URL building.
        Some(AuthConfig::Query { .. }) | None => request,
    }
}

/// Percent-encode everything outside RFC 3986 unreserved.
fn percent_encode(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn validate_arguments(tool: &RegisteredTool, args: &Value) -> Result<(), (String, Value)> {
    let schema = &tool.definition.input_schema;
    let props = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();

    let args_obj = args.as_object().cloned().unwrap_or_default();
    let valid_params: Vec<&str> = props.keys().map(String::as_str).collect();

    let mut violations: Vec<Value> = Vec::new();

    for key in args_obj.keys() {
        if props.contains_key(key) {
            continue;
        }
        let suggestions = find_similar_strings(key, &valid_params);
        violations.push(json!({
            "type": "invalid-parameter",
            "parameter": key,
            "suggestions": suggestions,
            "validParameters": valid_params,
        }));
    }

    for name in &required {
        if !args_obj.contains_key(*name) {
            violations.push(json!({
                "type": "missing-required-parameter",
                "parameter": name,
            }));
        }
    }

    for error in tool.validator.iter_errors(args) {
        // Required violations already have a nicer shape above.
        if matches!(
            error.kind(),
            jsonschema::error::ValidationErrorKind::Required { .. }
        ) {
            continue;
        }
        violations.push(json!({
            "type": "constraint-violation",
            "message": error.to_string(),
            "instancePath": error.instance_path().to_string(),
        }));
    }

    if violations.is_empty() {
        return Ok(());
    }

    let message = summarize_violations(&violations);
    Err((
        message,
        json!({ "type": "validation-errors", "violations": violations }),
    ))
}

fn summarize_violations(violations: &[Value]) -> String {
    let of_type = |t: &str| {
        violations
            .iter()
            .find(|v| v.get("type").and_then(Value::as_str) == Some(t))
    };

    if let Some(v) = of_type("invalid-parameter") {
        let parameter = v.get("parameter").and_then(Value::as_str).unwrap_or("?");
        let suggestion = v
            .get("suggestions")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str);
        return match suggestion {
            Some(s) => {
                format!("Invalid params: unknown parameter '{parameter}' (did you mean '{s}'?)")
            }
            None => format!("Invalid params: unknown parameter '{parameter}'"),
        };
    }
    if let Some(v) = of_type("missing-required-parameter") {
        let parameter = v.get("parameter").and_then(Value::as_str).unwrap_or("?");
        return format!("Invalid params: missing required parameter '{parameter}'");
    }
    format!(
        "Invalid params: validation failed with {} error(s)",
        violations.len()
    )
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}

fn success_result(response: UpstreamResponse) -> CallToolResult {
    let looks_json = response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("json"));

    if looks_json && let Ok(parsed) = serde_json::from_str::<Value>(&response.body) {
        let text = serde_json::to_string(&parsed).unwrap_or_else(|_| response.body.clone());
        return CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(parsed),
            is_error: Some(false),
            meta: None,
        };
    }

    // Non-JSON passes through as text, tagged with the declared media type.
    CallToolResult {
        content: vec![Content::text(response.body)],
        structured_content: response
            .content_type
            .map(|ct| json!({ "mediaType": ct })),
        is_error: Some(false),
        meta: None,
    }
}

fn upstream_error(response: &UpstreamResponse) -> CallToolResult {
    let body = truncate_chars(&response.body, MAX_ERROR_BODY_CHARS);
    let reason = response.status.canonical_reason().unwrap_or("Unknown");
    error_result(
        CallErrorKind::UpstreamError,
        format!(
            "upstream returned {} {reason}: {body}",
            response.status.as_u16()
        ),
        Some(json!({ "status": response.status.as_u16(), "body": body })),
    )
}

fn error_result(kind: CallErrorKind, message: String, detail: Option<Value>) -> CallToolResult {
    let mut structured = json!({ "errorKind": kind.as_str(), "message": message });
    if let Some(detail) = detail {
        structured["detail"] = detail;
    }
    CallToolResult {
        content: vec![Content::text(message)],
        structured_content: Some(structured),
        is_error: Some(true),
        meta: None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DispatchTarget;
    use reqwest::Method;
    use smartapi_openapi_tools::{FieldBinding, ToolDefinition, TranslatedOperation};

    fn tool(schema: Value, bindings: Vec<FieldBinding>) -> RegisteredTool {
        let validator = jsonschema::validator_for(&schema).expect("valid schema");
        RegisteredTool {
            definition: ToolDefinition::synthesize(
                "api1",
                Method::GET,
                "/genes/{id}",
                &json!({ "operationId": "getGene" }),
                TranslatedOperation {
                    input_schema: schema,
                    bindings,
                },
            ),
            target: DispatchTarget {
                base_url: "https://example.org".to_string(),
                auth: None,
            },
            validator,
        }
    }

    fn binding(name: &str, location: FieldLocation) -> FieldBinding {
        FieldBinding {
            field_name: name.to_string(),
            http_name: name.to_string(),
            location,
            required: false,
            whole_body: false,
        }
    }

    #[test]
    fn percent_encoding_covers_reserved_and_utf8() {
        assert_eq!(percent_encode("abc-123_~.X"), "abc-123_~.X");
        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(percent_encode("é"), "%C3%A9");
    }

    #[test]
    fn path_substitution_encodes_values() {
        let tool = tool(
            json!({ "type": "object", "properties": { "id": { "type": "string" } } }),
            vec![binding("id", FieldLocation::Path)],
        );
        let parts = build_request_parts(&tool, &json!({ "id": "BRCA 1/2" }));
        assert_eq!(parts.path, "/genes/BRCA%201%2F2");

        let url = build_url("https://example.org/", &parts.path, &parts.query).unwrap();
        assert_eq!(url.as_str(), "https://example.org/genes/BRCA%201%2F2");
    }

    #[test]
    fn bindings_route_fields_to_their_locations() {
        let mut whole = binding("body", FieldLocation::Body);
        whole.whole_body = true;
        let tool = tool(
            json!({ "type": "object", "properties": {} }),
            vec![
                binding("q", FieldLocation::Query),
                binding("X-Trace", FieldLocation::Header),
                binding("session", FieldLocation::Cookie),
                binding("fields", FieldLocation::Body),
                whole,
            ],
        );

        let parts = build_request_parts(
            &tool,
            &json!({
                "q": ["a", "b"],
                "X-Trace": "t1",
                "session": "s1",
                "fields": "symbol"
            }),
        );
        assert_eq!(
            parts.query,
            vec![
                ("q".to_string(), "a".to_string()),
                ("q".to_string(), "b".to_string())
            ]
        );
        assert_eq!(parts.headers, vec![("X-Trace".to_string(), "t1".to_string())]);
        assert_eq!(parts.cookies, vec![("session".to_string(), "s1".to_string())]);
        assert_eq!(parts.body_fields.get("fields"), Some(&json!("symbol")));
        assert!(parts.body_payload.is_none());
    }

    #[test]
    fn renamed_fields_are_unrenamed_at_request_build() {
        let tool = tool(
            json!({ "type": "object", "properties": {} }),
            vec![FieldBinding {
                field_name: "id_body".to_string(),
                http_name: "id".to_string(),
                location: FieldLocation::Body,
                required: false,
                whole_body: false,
            }],
        );
        let parts = build_request_parts(&tool, &json!({ "id_body": 7 }));
        assert_eq!(parts.body_fields.get("id"), Some(&json!(7)));
    }

    #[test]
    fn missing_required_parameter_is_reported_by_name() {
        let tool = tool(
            json!({
                "type": "object",
                "properties": { "gene_id": { "type": "string" } },
                "required": ["gene_id"]
            }),
            vec![binding("gene_id", FieldLocation::Query)],
        );
        let (message, detail) = validate_arguments(&tool, &json!({})).unwrap_err();
        assert!(message.contains("gene_id"), "message: {message}");
        assert_eq!(detail["violations"][0]["type"], "missing-required-parameter");
    }

    #[test]
    fn unknown_parameter_gets_a_suggestion() {
        let tool = tool(
            json!({
                "type": "object",
                "properties": { "species": { "type": "string" } }
            }),
            vec![binding("species", FieldLocation::Query)],
        );
        let (message, _) = validate_arguments(&tool, &json!({ "specie": "human" })).unwrap_err();
        assert!(message.contains("did you mean 'species'"), "message: {message}");
    }

    #[test]
    fn constraint_violations_carry_instance_paths() {
        let tool = tool(
            json!({
                "type": "object",
                "properties": { "size": { "type": "integer", "maximum": 10 } }
            }),
            vec![binding("size", FieldLocation::Query)],
        );
        let (_, detail) = validate_arguments(&tool, &json!({ "size": 100 })).unwrap_err();
        let violations = detail["violations"].as_array().unwrap();
        assert_eq!(violations[0]["type"], "constraint-violation");
        assert_eq!(violations[0]["instancePath"], "/size");
    }

    #[test]
    fn error_results_are_flagged_and_kinded() {
        let result = error_result(
            CallErrorKind::UnknownTool,
            "Tool not found: nope".to_string(),
            None,
        );
        assert_eq!(result.is_error, Some(true));
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["errorKind"], "UnknownTool");
    }
}
