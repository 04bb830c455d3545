//! Gateway: the HTTP surface of the bridge.
//!
//! `/healthz` for probes, `/teams` for HMAC-signed Teams outgoing webhooks, and
//! `/command` (raw command text, unauthenticated) only when explicitly enabled.

mod middleware;
mod server;

pub use middleware::RequestContext;
pub use server::{build_backend, build_state, router, run_gateway, serve, GatewayState};
