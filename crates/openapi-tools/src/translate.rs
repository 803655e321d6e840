//! Operation -> flattened input schema translation.
//!
//! One OpenAPI operation becomes a single object-shaped JSON Schema whose
//! fields come from the operation's parameters (path/query/header/cookie)
//! and the top-level properties of its JSON request body. Every field gets
//! exactly one [`FieldBinding`] telling the invocation layer where to put
//! it in the outgoing HTTP request.
//!
//! Translation is per-operation and total: anything this module cannot
//! express as one concrete object shape (top-level `oneOf`/`anyOf` bodies,
//! conflicting `allOf` merges, external refs) fails that operation with a
//! [`TranslationError`] and leaves the rest of the document alone.

use crate::error::{Result, TranslationError};
use crate::resolver::{Resolver, ref_of};
use openapiv3::{Parameter, ParameterData, ParameterSchemaOrContent, ReferenceOr, RequestBody};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};

/// Where a field is placed in the outgoing HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl FieldLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldLocation::Path => "path",
            FieldLocation::Query => "query",
            FieldLocation::Header => "header",
            FieldLocation::Cookie => "cookie",
            FieldLocation::Body => "body",
        }
    }
}

/// Placement rule for one input-schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    /// Name of the field in the tool input schema (renamed on collision).
    pub field_name: String,
    /// Name to use in the HTTP request (the original OpenAPI name).
    pub http_name: String,
    pub location: FieldLocation,
    pub required: bool,
    /// The field value is the entire request body, not one property of it.
    pub whole_body: bool,
}

/// Output of translating one operation.
#[derive(Debug, Clone)]
pub struct TranslatedOperation {
    /// Object-shaped JSON Schema for the tool's arguments.
    pub input_schema: Value,
    /// One binding per input-schema field; locations partition the field set.
    pub bindings: Vec<FieldBinding>,
}

struct Field {
    binding: FieldBinding,
    schema: Value,
}

enum BodyShape {
    Object {
        properties: Vec<(String, Value)>,
        required: HashSet<String>,
    },
    Whole(Value),
}

/// Translates operations of one OpenAPI document.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    resolver: Resolver<'a>,
}

impl<'a> Translator<'a> {
    #[must_use]
    pub fn new(document: &'a Value) -> Self {
        Self {
            resolver: Resolver::new(document),
        }
    }

    /// Translate one operation into an input schema plus binding table.
    ///
    /// `path_item` is the containing path item (its `parameters` apply to
    /// every operation under it, overridable per operation).
    ///
    /// # Errors
    ///
    /// Fails for this operation only; see [`TranslationError`].
    pub fn translate(&self, path_item: &Value, operation: &Value) -> Result<TranslatedOperation> {
        let mut fields: Vec<Field> = Vec::new();

        for param in self.merged_parameters(path_item, operation)? {
            let (location, data) = split_parameter(param);
            let schema = self.parameter_schema(&data.format)?;
            // Path parameters are required no matter what the document says.
            let required = data.required || location == FieldLocation::Path;
            push_field(
                &mut fields,
                Field {
                    binding: FieldBinding {
                        field_name: data.name.clone(),
                        http_name: data.name,
                        location,
                        required,
                        whole_body: false,
                    },
                    schema,
                },
            )?;
        }

        if let Some(body_node) = operation.get("requestBody") {
            self.flatten_body(body_node, &mut fields)?;
        }

        Ok(TranslatedOperation {
            input_schema: build_input_schema(&fields),
            bindings: fields.into_iter().map(|f| f.binding).collect(),
        })
    }

    fn merged_parameters(&self, path_item: &Value, operation: &Value) -> Result<Vec<Parameter>> {
        let mut merged: Vec<Parameter> = Vec::new();
        let mut index: HashMap<(FieldLocation, String), usize> = HashMap::new();

        // Path-item parameters first; operation-level ones with the same
        // (location, name) override them in place.
        for source in [path_item, operation] {
            let Some(params) = source.get("parameters").and_then(Value::as_array) else {
                continue;
            };
            for node in params {
                let param: Parameter = self.resolver.typed(node, "parameter")?;
                let (loc, name) = param_key(&param);
                let key = (loc, name.to_string());
                if let Some(&i) = index.get(&key) {
                    merged[i] = param;
                } else {
                    index.insert(key, merged.len());
                    merged.push(param);
                }
            }
        }
        Ok(merged)
    }

    fn parameter_schema(&self, format: &ParameterSchemaOrContent) -> Result<Value> {
        match format {
            ParameterSchemaOrContent::Schema(schema) => {
                let raw =
                    serde_json::to_value(schema).map_err(|e| TranslationError::Malformed {
                        what: "parameter schema",
                        message: e.to_string(),
                    })?;
                self.convert_schema(&raw, &mut Vec::new())
            }
            // `content`-style parameters carry serialized payloads.
            ParameterSchemaOrContent::Content(_) => Ok(json!({ "type": "string" })),
        }
    }

    fn flatten_body(&self, node: &Value, fields: &mut Vec<Field>) -> Result<()> {
        let body: RequestBody = self.resolver.typed(node, "request body")?;

        let Some(schema_ref) = json_media_schema(&body) else {
            // Non-JSON bodies (text, form, binary) surface as one opaque field.
            if !body.content.is_empty() {
                push_field(
                    fields,
                    Field {
                        binding: whole_body_binding(body.required),
                        schema: json!({ "type": "string", "description": "Raw request body" }),
                    },
                )?;
            }
            return Ok(());
        };

        let raw = serde_json::to_value(schema_ref).map_err(|e| TranslationError::Malformed {
            what: "request body schema",
            message: e.to_string(),
        })?;
        let top = self.resolver.deref(&raw)?;

        match self.flatten_body_schema(top)? {
            BodyShape::Object {
                properties,
                required,
            } => {
                for (name, schema) in properties {
                    let field_required = body.required && required.contains(&name);
                    push_field(
                        fields,
                        Field {
                            binding: FieldBinding {
                                field_name: name.clone(),
                                http_name: name,
                                location: FieldLocation::Body,
                                required: field_required,
                                whole_body: false,
                            },
                            schema,
                        },
                    )?;
                }
            }
            BodyShape::Whole(schema) => {
                push_field(
                    fields,
                    Field {
                        binding: whole_body_binding(body.required),
                        schema,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn flatten_body_schema(&self, top: &Value) -> Result<BodyShape> {
        for combinator in ["oneOf", "anyOf"] {
            if top.get(combinator).is_some() {
                return Err(TranslationError::TopLevelCombinator { combinator });
            }
        }
        if let Some(branches) = top.get("allOf").and_then(Value::as_array) {
            return self.merge_all_of(branches);
        }

        let is_object = top.get("properties").is_some()
            || top.get("type").and_then(Value::as_str) == Some("object");
        if !is_object {
            return Ok(BodyShape::Whole(
                self.convert_schema(top, &mut Vec::new())?,
            ));
        }

        let mut properties = Vec::new();
        if let Some(props) = top.get("properties").and_then(Value::as_object) {
            for (name, schema) in props {
                properties.push((name.clone(), self.convert_schema(schema, &mut Vec::new())?));
            }
        }
        let required = top
            .get("required")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(BodyShape::Object {
            properties,
            required,
        })
    }

    fn merge_all_of(&self, branches: &[Value]) -> Result<BodyShape> {
        let mut properties: Vec<(String, Value)> = Vec::new();
        let mut required: HashSet<String> = HashSet::new();

        for branch in branches {
            let branch = self.resolver.deref(branch)?;
            let BodyShape::Object {
                properties: props,
                required: req,
            } = self.flatten_body_schema(branch)?
            else {
                return Err(TranslationError::AllOfNonObject);
            };

            for (name, schema) in props {
                match properties.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, existing)) => {
                        if existing.get("type") != schema.get("type") {
                            return Err(TranslationError::AllOfConflict { property: name });
                        }
                        // Same declared type: the later branch refines it.
                        *existing = schema;
                    }
                    None => properties.push((name, schema)),
                }
            }
            required.extend(req);
        }
        Ok(BodyShape::Object {
            properties,
            required,
        })
    }

    /// Convert an OpenAPI schema node to JSON Schema, inlining local refs
    /// and preserving constraints verbatim.
    fn convert_schema(&self, node: &Value, visiting: &mut Vec<String>) -> Result<Value> {
        if let Some(reference) = ref_of(node) {
            // Recursive schemas are cut at the point of re-entry.
            if visiting.iter().any(|r| r == reference) {
                return Ok(json!({ "type": "object" }));
            }
            let target = self.resolver.lookup(reference)?;
            visiting.push(reference.to_string());
            let out = self.convert_schema(target, visiting);
            visiting.pop();
            return out;
        }

        let Some(obj) = node.as_object() else {
            // Boolean schemas pass through untouched.
            return Ok(node.clone());
        };

        let mut out = Map::new();
        for key in SCHEMA_KEYS {
            if let Some(v) = obj.get(*key) {
                out.insert((*key).to_string(), v.clone());
            }
        }

        if let Some(items) = obj.get("items") {
            out.insert("items".to_string(), self.convert_schema(items, visiting)?);
        }
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            let mut converted = Map::new();
            for (name, schema) in props {
                converted.insert(name.clone(), self.convert_schema(schema, visiting)?);
            }
            out.insert("properties".to_string(), Value::Object(converted));
        }
        if let Some(additional) = obj.get("additionalProperties") {
            let v = if additional.is_object() {
                self.convert_schema(additional, visiting)?
            } else {
                additional.clone()
            };
            out.insert("additionalProperties".to_string(), v);
        }
        // Combinators nested below the top level pass through; call-time
        // validation handles them.
        for combinator in ["allOf", "oneOf", "anyOf"] {
            if let Some(branches) = obj.get(combinator).and_then(Value::as_array) {
                let converted = branches
                    .iter()
                    .map(|b| self.convert_schema(b, visiting))
                    .collect::<Result<Vec<_>>>()?;
                out.insert(combinator.to_string(), Value::Array(converted));
            }
        }

        // OpenAPI 3.0 `nullable` becomes a JSON Schema type union.
        if obj.get("nullable").and_then(Value::as_bool) == Some(true)
            && let Some(ty) = out.get("type").and_then(Value::as_str).map(str::to_string)
        {
            out.insert("type".to_string(), json!([ty, "null"]));
        }

        Ok(Value::Object(out))
    }
}

const SCHEMA_KEYS: &[&str] = &[
    "type",
    "description",
    "title",
    "format",
    "default",
    "enum",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "required",
];

fn whole_body_binding(required: bool) -> FieldBinding {
    FieldBinding {
        field_name: "body".to_string(),
        http_name: "body".to_string(),
        location: FieldLocation::Body,
        required,
        whole_body: true,
    }
}

fn split_parameter(param: Parameter) -> (FieldLocation, ParameterData) {
    match param {
        Parameter::Path { parameter_data, .. } => (FieldLocation::Path, parameter_data),
        Parameter::Query { parameter_data, .. } => (FieldLocation::Query, parameter_data),
        Parameter::Header { parameter_data, .. } => (FieldLocation::Header, parameter_data),
        Parameter::Cookie { parameter_data, .. } => (FieldLocation::Cookie, parameter_data),
    }
}

fn param_key(param: &Parameter) -> (FieldLocation, &str) {
    match param {
        Parameter::Path { parameter_data, .. } => (FieldLocation::Path, &parameter_data.name),
        Parameter::Query { parameter_data, .. } => (FieldLocation::Query, &parameter_data.name),
        Parameter::Header { parameter_data, .. } => (FieldLocation::Header, &parameter_data.name),
        Parameter::Cookie { parameter_data, .. } => (FieldLocation::Cookie, &parameter_data.name),
    }
}

fn json_media_schema(body: &RequestBody) -> Option<&ReferenceOr<openapiv3::Schema>> {
    if let Some(media) = body.content.get("application/json") {
        return media.schema.as_ref();
    }
    // e.g. application/vnd.api+json
    body.content
        .iter()
        .find(|(k, _)| k.contains("json"))
        .and_then(|(_, m)| m.schema.as_ref())
}

fn push_field(fields: &mut Vec<Field>, mut field: Field) -> Result<()> {
    if fields
        .iter()
        .any(|f| f.binding.field_name == field.binding.field_name)
    {
        let renamed = format!(
            "{}_{}",
            field.binding.http_name,
            field.binding.location.as_str()
        );
        if fields.iter().any(|f| f.binding.field_name == renamed) {
            return Err(TranslationError::FieldCollision {
                name: field.binding.http_name,
            });
        }
        field.binding.field_name = renamed;
    }
    fields.push(field);
    Ok(())
}

fn build_input_schema(fields: &[Field]) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    for field in fields {
        properties.insert(field.binding.field_name.clone(), field.schema.clone());
        // A field with a default can be omitted; the upstream applies it.
        // Path fields never get the exemption: there is no request without
        // a value to fill the placeholder.
        let defaulted = field.schema.get("default").is_some()
            && field.binding.location != FieldLocation::Path;
        if field.binding.required && !defaulted {
            required.push(field.binding.field_name.clone());
        }
    }

    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}
