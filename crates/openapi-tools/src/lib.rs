//! OpenAPI operation -> MCP tool translation.
//!
//! This crate turns single OpenAPI operations (raw JSON trees, as served by
//! the registry) into flattened MCP tool input schemas, binding tables that
//! tell the invocation layer where each field goes in the HTTP request, and
//! named [`synth::ToolDefinition`]s.
//!
//! It performs no I/O: `$ref`s are resolved against the containing document
//! only, and external references fail translation for that one operation.

pub mod error;
pub mod resolver;
pub mod semantics;
pub mod synth;
pub mod translate;

pub use error::{NameCollisionError, TranslationError};
pub use resolver::Resolver;
pub use synth::ToolDefinition;
pub use translate::{FieldBinding, FieldLocation, TranslatedOperation, Translator};
