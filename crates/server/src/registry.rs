//! Concurrency-safe tool registry.
//!
//! One `RwLock` guards both maps, so `register` replaces an API's entries
//! atomically and readers never observe a partially updated set. Collision
//! handling and schema compilation happen here, where the global name set
//! is visible.

use crate::config::AuthConfig;
use jsonschema::Validator;
use parking_lot::RwLock;
use rmcp::model::Tool;
use smartapi_openapi_tools::{NameCollisionError, ToolDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// Where and how a tool's HTTP requests are sent.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    /// Absolute base URL of the upstream API.
    pub base_url: String,
    /// Credential placement resolved from config and the spec's declared
    /// security scheme.
    pub auth: Option<AuthConfig>,
}

/// A registered, callable tool.
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub target: DispatchTarget,
    /// Input schema compiled once at registration.
    pub validator: Validator,
}

#[derive(Debug, Clone)]
pub struct SkippedOperation {
    /// `METHOD /path` of the operation that was skipped.
    pub operation: String,
    pub error: String,
}

/// Outcome of registering one API's tool batch.
#[derive(Debug, Clone)]
pub struct RegistrationReport {
    pub api_id: String,
    /// Final (possibly suffixed) names of the tools now exposed.
    pub registered: Vec<String>,
    /// (operation, error) pairs for everything that was not registered.
    pub skipped: Vec<SkippedOperation>,
}

#[derive(Default)]
struct Inner {
    tools: HashMap<String, Arc<RegisteredTool>>,
    by_api: HashMap<String, Vec<String>>,
}

/// Name -> tool mapping shared by the MCP surface and the proxy.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `definitions` for `api_id`, replacing any prior entries of
    /// the same API in the same atomic step.
    ///
    /// Cross-API name collisions get the deterministic api suffix; a name
    /// still taken after that is skipped and reported. A definition whose
    /// input schema fails to compile is skipped and reported; it is never
    /// exposed.
    pub fn register(
        &self,
        api_id: &str,
        definitions: Vec<ToolDefinition>,
        target: &DispatchTarget,
    ) -> RegistrationReport {
        let mut report = RegistrationReport {
            api_id: api_id.to_string(),
            registered: Vec::new(),
            skipped: Vec::new(),
        };

        let mut inner = self.inner.write();

        if let Some(old) = inner.by_api.remove(api_id) {
            for name in old {
                inner.tools.remove(&name);
            }
        }

        let mut owned: Vec<String> = Vec::new();
        for mut definition in definitions {
            let operation = format!("{} {}", definition.method, definition.path);

            let name = if inner.tools.contains_key(&definition.name) {
                let suffixed = definition.api_suffixed_name();
                if inner.tools.contains_key(&suffixed) {
                    let err = NameCollisionError {
                        name: suffixed,
                        api_id: api_id.to_string(),
                    };
                    tracing::warn!(api_id, operation = %operation, error = %err, "skipping tool");
                    report.skipped.push(SkippedOperation {
                        operation,
                        error: err.to_string(),
                    });
                    continue;
                }
                suffixed
            } else {
                definition.name.clone()
            };

            let validator = match jsonschema::validator_for(&definition.input_schema) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(api_id, operation = %operation, error = %e, "input schema failed to compile; skipping tool");
                    report.skipped.push(SkippedOperation {
                        operation,
                        error: format!("input schema failed to compile: {e}"),
                    });
                    continue;
                }
            };

            definition.name.clone_from(&name);
            owned.push(name.clone());
            report.registered.push(name.clone());
            inner.tools.insert(
                name,
                Arc::new(RegisteredTool {
                    definition,
                    target: target.clone(),
                    validator,
                }),
            );
        }

        inner.by_api.insert(api_id.to_string(), owned);
        report
    }

    /// Remove every tool owned by `api_id`; returns how many were removed.
    pub fn unregister(&self, api_id: &str) -> usize {
        let mut inner = self.inner.write();
        let Some(names) = inner.by_api.remove(api_id) else {
            return 0;
        };
        let count = names.len();
        for name in names {
            inner.tools.remove(&name);
        }
        count
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.inner.read().tools.get(name).cloned()
    }

    /// MCP tool list, sorted by name for a stable client view.
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        let inner = self.inner.read();
        let mut tools: Vec<Tool> = inner
            .tools
            .values()
            .map(|t| t.definition.to_tool())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use serde_json::json;
    use smartapi_openapi_tools::TranslatedOperation;

    fn target() -> DispatchTarget {
        DispatchTarget {
            base_url: "https://example.org".to_string(),
            auth: None,
        }
    }

    fn definition(api_id: &str, name: &str) -> ToolDefinition {
        ToolDefinition::synthesize(
            api_id,
            Method::GET,
            "/query",
            &json!({ "operationId": name }),
            TranslatedOperation {
                input_schema: json!({ "type": "object", "properties": {} }),
                bindings: Vec::new(),
            },
        )
    }

    #[test]
    fn list_never_contains_duplicate_names() {
        let registry = ToolRegistry::new();
        registry.register("aaaa1111bbbb", vec![definition("aaaa1111bbbb", "query")], &target());
        registry.register("cccc2222dddd", vec![definition("cccc2222dddd", "query")], &target());

        let names: Vec<String> = registry
            .list()
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"query".to_string()));
        assert!(names.contains(&"query_cccc2222".to_string()));
    }

    #[test]
    fn surviving_collision_is_skipped_not_overwritten() {
        let registry = ToolRegistry::new();
        registry.register("aaaa1111bbbb", vec![definition("aaaa1111bbbb", "query")], &target());
        // Force both the base and the suffixed name to be taken.
        registry.register(
            "other",
            vec![{
                let mut d = definition("other", "ignored");
                d.name = "query_cccc2222".to_string();
                d
            }],
            &target(),
        );

        let report = registry.register(
            "cccc2222dddd",
            vec![definition("cccc2222dddd", "query")],
            &target(),
        );
        assert!(report.registered.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].error.contains("collides"));
        // The original owner is untouched.
        assert!(registry.lookup("query").is_some());
    }

    #[test]
    fn reregistration_replaces_prior_entries() {
        let registry = ToolRegistry::new();
        registry.register(
            "api1",
            vec![definition("api1", "old_tool"), definition("api1", "kept")],
            &target(),
        );
        let report = registry.register("api1", vec![definition("api1", "kept")], &target());

        assert_eq!(report.registered, vec!["kept".to_string()]);
        assert!(registry.lookup("old_tool").is_none());
        assert!(registry.lookup("kept").is_some());
    }

    #[test]
    fn uncompilable_schema_is_skipped() {
        let registry = ToolRegistry::new();
        let mut bad = definition("api1", "broken");
        bad.input_schema = json!({ "type": 12 });
        let report = registry.register("api1", vec![bad, definition("api1", "good")], &target());

        assert_eq!(report.registered, vec!["good".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        assert!(registry.lookup("broken").is_none());
    }

    #[test]
    fn unregister_removes_only_that_api() {
        let registry = ToolRegistry::new();
        registry.register("api1", vec![definition("api1", "one")], &target());
        registry.register("api2", vec![definition("api2", "two")], &target());

        assert_eq!(registry.unregister("api1"), 1);
        assert!(registry.lookup("one").is_none());
        assert!(registry.lookup("two").is_some());
        assert_eq!(registry.unregister("api1"), 0);
    }
}
