//! HTTP surface: the gated root endpoint, health and metrics.

mod handlers;
mod server;
mod state;

pub use handlers::{admit_handler, health_handler, metrics_handler};
pub use server::{router, serve_listener, HttpServer};
pub use state::GatewayState;
