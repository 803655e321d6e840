//! SmartAPI registry integration.
//!
//! This crate talks to a SmartAPI-style registry (search + per-API OpenAPI
//! metadata) and provides a caching, single-flight [`fetcher::SpecFetcher`]
//! on top of the raw [`client::RegistryClient`].
//!
//! It intentionally contains **no** OpenAPI translation logic and **no**
//! MCP surface; those live in the sibling crates.

pub mod client;
pub mod error;
pub mod fetcher;

pub use client::{ApiSummary, RegistryClient};
pub use error::SpecFetchError;
pub use fetcher::{ApiSpec, FetchOutcome, SpecFetcher};
