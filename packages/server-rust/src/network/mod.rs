//! HTTP surface of a grid node: configuration, middleware, handlers, and the server.

pub mod config;
pub mod context_layer;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use context_layer::{ContextLayer, ContextService, RequestContext};
pub use handlers::AppState;
pub use module::NodeServer;
