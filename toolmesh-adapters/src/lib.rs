//! Toolmesh Adapters - Tool Plug-ins and the Context Bridge
//!
//! The adapter trait, the registry (lookup, health rollup, shutdown fan-out),
//! and the bridge that records every tool request, response, error, and
//! webhook as items in the owning context.

mod adapter;
mod bridge;
mod http;
mod registry;

pub use adapter::ToolAdapter;
pub use bridge::ContextBridge;
pub use http::{adapter_http_client, OVERALL_TIMEOUT, READ_TIMEOUT};
pub use registry::AdapterRegistry;
