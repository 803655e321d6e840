//! Transport-agnostic server core.
//!
//! `ServerCore` owns the fetcher, the tool registry and the invocation
//! proxy, and exposes the operations a transport wires to MCP methods:
//! search the registry, onboard/offboard an API, list tools, call a tool.

use crate::config::{ApiConfig, AuthConfig, ServerConfig};
use crate::proxy::InvocationProxy;
use crate::registry::{DispatchTarget, RegistrationReport, SkippedOperation, ToolRegistry};
use crate::retry::RetryPolicy;
use reqwest::Method;
use rmcp::model::{CallToolResult, Tool};
use serde_json::Value;
use smartapi_openapi_tools::{Resolver, ToolDefinition, Translator};
use smartapi_registry::{ApiSummary, RegistryClient, SpecFetchError, SpecFetcher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lowercase keys of `paths` entries that hold operations.
const METHODS: [&str; 6] = ["get", "put", "post", "delete", "patch", "head"];

pub struct ServerCore {
    config: ServerConfig,
    fetcher: SpecFetcher,
    client: RegistryClient,
    registry: Arc<ToolRegistry>,
    proxy: InvocationProxy,
}

impl ServerCore {
    /// # Errors
    ///
    /// Fails only when the configured registry URL is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, SpecFetchError> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let client = RegistryClient::new(&config.registry_url, timeout)?;
        let fetcher = SpecFetcher::new(
            client.clone(),
            Duration::from_secs(config.spec_ttl_secs),
        );
        let registry = Arc::new(ToolRegistry::new());
        let proxy = InvocationProxy::new(
            Arc::clone(&registry),
            timeout,
            RetryPolicy::from_config(&config.retry),
            config.max_concurrency,
        );
        Ok(Self {
            config,
            fetcher,
            client,
            registry,
            proxy,
        })
    }

    /// Onboard every API named in the config. One API failing does not stop
    /// the others; failures are logged and omitted from the returned reports.
    pub async fn onboard_configured(&self) -> Vec<RegistrationReport> {
        let mut reports = Vec::new();
        for api in self.config.apis.clone() {
            match self.onboard_api(&api).await {
                Ok(report) => {
                    tracing::info!(
                        api_id = %api.id,
                        registered = report.registered.len(),
                        skipped = report.skipped.len(),
                        "onboarded API"
                    );
                    reports.push(report);
                }
                Err(err) => {
                    tracing::error!(api_id = %api.id, error = %err, "failed to onboard API");
                }
            }
        }
        reports
    }

    /// Fetch, translate and register one API's tools.
    ///
    /// Untranslatable operations are skipped and reported; the fetch itself
    /// failing (with nothing stale to serve) fails the whole onboarding.
    ///
    /// # Errors
    ///
    /// Returns an error when the spec cannot be fetched or declares no
    /// usable base URL.
    pub async fn onboard_api(&self, api: &ApiConfig) -> Result<RegistrationReport, SpecFetchError> {
        let outcome = self.fetcher.get(&api.id).await?;
        if let Some(note) = &outcome.degraded {
            tracing::warn!(api_id = %api.id, note, "onboarding from a stale spec");
        }
        let spec = &outcome.spec;
        tracing::debug!(api_id = %api.id, title = %spec.title, version = %spec.version, "translating spec");

        let target = DispatchTarget {
            base_url: resolve_base_url(api, &spec.document)?,
            auth: resolve_auth(api, &spec.document),
        };

        let (definitions, translation_skips) = translate_document(&api.id, &spec.document);
        let mut report = self.registry.register(&api.id, definitions, &target);
        report.skipped.extend(translation_skips);
        Ok(report)
    }

    /// Remove an API's tools; returns how many were removed.
    pub fn offboard_api(&self, api_id: &str) -> usize {
        self.fetcher.invalidate(api_id);
        self.registry.unregister(api_id)
    }

    /// Full-text registry search.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry request fails.
    pub async fn search(&self, query: &str) -> Result<Vec<ApiSummary>, SpecFetchError> {
        self.client.search(query, self.config.search_limit).await
    }

    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.registry.list()
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        self.proxy.invoke(name, arguments, cancel).await
    }
}

/// Translate every operation in `document` into tool definitions.
///
/// Translation failures degrade per operation: the operation is skipped
/// with a reason, the rest of the document still translates.
fn translate_document(api_id: &str, document: &Value) -> (Vec<ToolDefinition>, Vec<SkippedOperation>) {
    let mut definitions = Vec::new();
    let mut skipped = Vec::new();

    let translator = Translator::new(document);
    let resolver = Resolver::new(document);

    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return (definitions, skipped);
    };

    for (path, item) in paths {
        // Path items themselves may be $refs.
        let item = match resolver.deref(item) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(api_id, path, error = %err, "skipping unresolvable path item");
                skipped.push(SkippedOperation {
                    operation: format!("* {path}"),
                    error: err.to_string(),
                });
                continue;
            }
        };

        for method_key in METHODS {
            let Some(operation) = item.get(method_key) else {
                continue;
            };
            let operation_label = format!("{} {path}", method_key.to_uppercase());
            let Ok(method) = Method::from_bytes(method_key.to_uppercase().as_bytes()) else {
                continue;
            };

            match translator.translate(item, operation) {
                Ok(translated) => {
                    definitions.push(ToolDefinition::synthesize(
                        api_id, method, path, operation, translated,
                    ));
                }
                Err(err) => {
                    tracing::warn!(api_id, operation = %operation_label, error = %err, "skipping untranslatable operation");
                    skipped.push(SkippedOperation {
                        operation: operation_label,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    (definitions, skipped)
}

/// Config override wins; otherwise the spec's first `servers` entry.
fn resolve_base_url(api: &ApiConfig, document: &Value) -> Result<String, SpecFetchError> {
    let url = match &api.base_url {
        Some(url) => url.clone(),
        None => document
            .pointer("/servers/0/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(SpecFetchError::MissingField {
                api_id: api.id.clone(),
                field: "servers",
            })?,
    };

    // Relative server URLs cannot be dispatched to.
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(SpecFetchError::BaseUrl {
            url,
            message: "server URL is not absolute".to_string(),
        });
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Explicit auth config wins. A bare `apiKey` is placed according to the
/// first recognizable security scheme the spec declares; with none, it
/// defaults to a bearer token.
fn resolve_auth(api: &ApiConfig, document: &Value) -> Option<AuthConfig> {
    if let Some(auth) = &api.auth {
        return Some(auth.clone());
    }
    let key = api.api_key.as_ref()?;

    let schemes = document
        .pointer("/components/securitySchemes")
        .and_then(Value::as_object);
    if let Some(schemes) = schemes {
        for scheme in schemes.values() {
            let kind = scheme.get("type").and_then(Value::as_str);
            match kind {
                Some("apiKey") => {
                    let Some(name) = scheme.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let name = name.to_string();
                    return match scheme.get("in").and_then(Value::as_str) {
                        Some("header") => Some(AuthConfig::Header {
                            name,
                            value: key.clone(),
                        }),
                        Some("query") => Some(AuthConfig::Query {
                            name,
                            value: key.clone(),
                        }),
                        _ => continue,
                    };
                }
                Some("http")
                    if scheme.get("scheme").and_then(Value::as_str) == Some("bearer") =>
                {
                    return Some(AuthConfig::Bearer { token: key.clone() });
                }
                _ => {}
            }
        }
    }

    Some(AuthConfig::Bearer { token: key.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api(id: &str) -> ApiConfig {
        ApiConfig::for_id(id)
    }

    #[test]
    fn translate_document_emits_one_tool_per_operation() {
        let document = json!({
            "openapi": "3.0.0",
            "paths": {
                "/genes/{id}": {
                    "parameters": [
                        { "name": "id", "in": "path", "required": true,
                          "schema": { "type": "string" } }
                    ],
                    "get": { "operationId": "getGene" },
                    "delete": { "operationId": "deleteGene" }
                },
                "/query": {
                    "get": {
                        "operationId": "queryGenes",
                        "parameters": [
                            { "name": "q", "in": "query",
                              "schema": { "type": "string" } }
                        ]
                    }
                }
            }
        });

        let (definitions, skipped) = translate_document("api1", &document);
        assert!(skipped.is_empty(), "skipped: {skipped:?}");
        let mut names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["deleteGene", "getGene", "queryGenes"]);
    }

    #[test]
    fn untranslatable_operation_is_skipped_not_fatal() {
        let document = json!({
            "paths": {
                "/a": {
                    "get": {
                        "operationId": "good",
                        "parameters": [
                            { "name": "q", "in": "query",
                              "schema": { "type": "string" } }
                        ]
                    },
                    "post": {
                        "operationId": "bad",
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "https://elsewhere/schema.json" }
                                }
                            }
                        }
                    }
                }
            }
        });

        let (definitions, skipped) = translate_document("api1", &document);
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "good");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].operation, "POST /a");
    }

    #[test]
    fn base_url_override_wins_over_servers() {
        let document = json!({ "servers": [ { "url": "https://spec.example/v1" } ] });
        let mut cfg = api("x");
        cfg.base_url = Some("https://override.example/".to_string());
        assert_eq!(
            resolve_base_url(&cfg, &document).unwrap(),
            "https://override.example"
        );
        assert_eq!(
            resolve_base_url(&api("x"), &document).unwrap(),
            "https://spec.example/v1"
        );
    }

    #[test]
    fn missing_or_relative_servers_fail_base_url_resolution() {
        assert!(matches!(
            resolve_base_url(&api("x"), &json!({})).unwrap_err(),
            SpecFetchError::MissingField { field: "servers", .. }
        ));
        assert!(matches!(
            resolve_base_url(&api("x"), &json!({ "servers": [ { "url": "/v3" } ] }))
                .unwrap_err(),
            SpecFetchError::BaseUrl { .. }
        ));
    }

    #[test]
    fn api_key_follows_declared_security_scheme() {
        let mut cfg = api("x");
        cfg.api_key = Some("k".to_string());

        let header_spec = json!({
            "components": { "securitySchemes": {
                "key": { "type": "apiKey", "in": "header", "name": "X-Api-Key" }
            } }
        });
        assert_eq!(
            resolve_auth(&cfg, &header_spec),
            Some(AuthConfig::Header {
                name: "X-Api-Key".to_string(),
                value: "k".to_string()
            })
        );

        let query_spec = json!({
            "components": { "securitySchemes": {
                "key": { "type": "apiKey", "in": "query", "name": "api_key" }
            } }
        });
        assert_eq!(
            resolve_auth(&cfg, &query_spec),
            Some(AuthConfig::Query {
                name: "api_key".to_string(),
                value: "k".to_string()
            })
        );

        // No declared scheme: default to bearer.
        assert_eq!(
            resolve_auth(&cfg, &json!({})),
            Some(AuthConfig::Bearer { token: "k".to_string() })
        );
    }

    #[test]
    fn explicit_auth_wins_over_api_key() {
        let mut cfg = api("x");
        cfg.api_key = Some("k".to_string());
        cfg.auth = Some(AuthConfig::Basic {
            username: "u".to_string(),
            password: "p".to_string(),
        });
        assert_eq!(resolve_auth(&cfg, &json!({})), cfg.auth);
    }
}
