//! Error types for `smartapi-openapi-tools`.

use thiserror::Error;

/// Errors scoped to translating one operation.
///
/// A failure here never aborts registration of the rest of the document;
/// callers collect these per operation and move on.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// The `$ref` points outside the containing document.
    #[error("external $ref '{reference}' is not supported (documents must be self-contained)")]
    ExternalRef { reference: String },

    /// The `$ref` could not be resolved within the document.
    #[error("unresolved $ref '{reference}': {message}")]
    UnresolvedRef { reference: String, message: String },

    /// A `$ref` chain loops back on itself.
    #[error("cyclic $ref chain through '{reference}'")]
    CyclicRef { reference: String },

    /// A typed node (parameter, request body) failed to deserialize.
    #[error("malformed {what}: {message}")]
    Malformed { what: &'static str, message: String },

    /// Two `allOf` branches declare the same property with different types.
    #[error("allOf branches disagree on the type of property '{property}'")]
    AllOfConflict { property: String },

    /// An `allOf` branch is not an object schema.
    #[error("allOf branch is not an object schema and cannot be merged")]
    AllOfNonObject,

    /// The request body is a top-level `oneOf`/`anyOf`.
    #[error("request body is a top-level {combinator}; tool inputs must be one concrete object shape")]
    TopLevelCombinator { combinator: &'static str },

    /// A field name collides across locations even after renaming.
    #[error("field '{name}' collides across locations and cannot be renamed apart")]
    FieldCollision { name: String },
}

/// A tool name that is still taken after deterministic disambiguation.
#[derive(Error, Debug, Clone)]
#[error("tool name '{name}' from API '{api_id}' collides with an already registered tool")]
pub struct NameCollisionError {
    pub name: String,
    pub api_id: String,
}

/// Result type alias for translation operations.
pub type Result<T> = std::result::Result<T, TranslationError>;
