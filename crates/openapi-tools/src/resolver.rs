//! Local-document `$ref` resolver.
//!
//! Registry metadata documents are served self-contained, so only fragment
//! refs (`#/components/...`) are supported; a ref into another file or URL
//! fails translation for the operation that carries it. Resolution is a
//! plain JSON-pointer lookup in the raw document tree.

use crate::error::{Result, TranslationError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Resolves `$ref` nodes against one OpenAPI document.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    root: &'a Value,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    /// Look up a single `$ref` string in the document.
    ///
    /// # Errors
    ///
    /// Returns `ExternalRef` for refs that leave the document and
    /// `UnresolvedRef` when the pointer has no target.
    pub fn lookup(&self, reference: &str) -> Result<&'a Value> {
        let Some(fragment) = reference.strip_prefix('#') else {
            return Err(TranslationError::ExternalRef {
                reference: reference.to_string(),
            });
        };
        if fragment.is_empty() {
            return Ok(self.root);
        }
        if !fragment.starts_with('/') {
            return Err(TranslationError::UnresolvedRef {
                reference: reference.to_string(),
                message: "fragment is not a JSON pointer".to_string(),
            });
        }
        self.root
            .pointer(fragment)
            .ok_or_else(|| TranslationError::UnresolvedRef {
                reference: reference.to_string(),
                message: "no such pointer in document".to_string(),
            })
    }

    /// Follow `$ref` chains until a concrete node is reached.
    ///
    /// # Errors
    ///
    /// Returns an error for external or dangling refs, and `CyclicRef` when
    /// a chain revisits a reference.
    pub fn deref<'v>(&self, node: &'v Value) -> Result<&'v Value>
    where
        'a: 'v,
    {
        let mut seen: Vec<&str> = Vec::new();
        let mut cur: &'v Value = node;
        while let Some(reference) = ref_of(cur) {
            if seen.contains(&reference) {
                return Err(TranslationError::CyclicRef {
                    reference: reference.to_string(),
                });
            }
            seen.push(reference);
            cur = self.lookup(reference)?;
        }
        Ok(cur)
    }

    /// Deref, then deserialize the target into a typed OpenAPI node.
    ///
    /// # Errors
    ///
    /// Returns ref-resolution errors, or `Malformed` (tagged with `what`)
    /// when the target does not deserialize as `T`.
    pub fn typed<T: DeserializeOwned>(&self, node: &Value, what: &'static str) -> Result<T> {
        let resolved = self.deref(node)?;
        serde_json::from_value(resolved.clone()).map_err(|e| TranslationError::Malformed {
            what,
            message: e.to_string(),
        })
    }
}

pub(crate) fn ref_of(node: &Value) -> Option<&str> {
    node.get("$ref").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deref_follows_chains() {
        let doc = json!({
            "components": { "schemas": {
                "A": { "$ref": "#/components/schemas/B" },
                "B": { "type": "string" }
            }}
        });
        let resolver = Resolver::new(&doc);
        let node = json!({ "$ref": "#/components/schemas/A" });
        assert_eq!(resolver.deref(&node).unwrap(), &json!({ "type": "string" }));
    }

    #[test]
    fn deref_detects_cycles() {
        let doc = json!({
            "components": { "schemas": {
                "A": { "$ref": "#/components/schemas/B" },
                "B": { "$ref": "#/components/schemas/A" }
            }}
        });
        let resolver = Resolver::new(&doc);
        let node = json!({ "$ref": "#/components/schemas/A" });
        assert!(matches!(
            resolver.deref(&node).unwrap_err(),
            TranslationError::CyclicRef { .. }
        ));
    }

    #[test]
    fn external_refs_are_rejected() {
        let doc = json!({});
        let resolver = Resolver::new(&doc);
        let node = json!({ "$ref": "common.yaml#/Pet" });
        assert!(matches!(
            resolver.deref(&node).unwrap_err(),
            TranslationError::ExternalRef { .. }
        ));
    }

    #[test]
    fn dangling_pointer_is_unresolved() {
        let doc = json!({ "components": {} });
        let resolver = Resolver::new(&doc);
        let node = json!({ "$ref": "#/components/schemas/Missing" });
        assert!(matches!(
            resolver.deref(&node).unwrap_err(),
            TranslationError::UnresolvedRef { .. }
        ));
    }
}
