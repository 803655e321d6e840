//! MCP server core: tool registry, invocation proxy, API onboarding.
//!
//! The transport-facing binary (`smartapi-mcp`) wires [`surface::ServerCore`]
//! to a line-delimited JSON-RPC stdio loop; the core itself neither knows nor
//! cares which transport carries `tools/list` and `tools/call`.

pub mod config;
pub mod proxy;
pub mod registry;
pub mod retry;
pub mod surface;

pub use config::{ApiConfig, AuthConfig, ServerConfig};
pub use proxy::{CallErrorKind, InvocationProxy};
pub use registry::{DispatchTarget, RegistrationReport, SkippedOperation, ToolRegistry};
pub use retry::RetryPolicy;
pub use surface::ServerCore;
