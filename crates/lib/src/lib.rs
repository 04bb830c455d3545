//! Kontrol core library: allow-listed chat commands for a Kubernetes cluster.
//!
//! Requests are authenticated (`auth`), parsed and validated against the allow-list
//! (`allowlist`, `command`), dispatched to a cluster backend (`backend`) and rendered
//! for the caller (`render`). The `gateway` wires these into an HTTP server.

pub mod allowlist;
pub mod auth;
pub mod backend;
pub mod channels;
pub mod command;
pub mod config;
pub mod gateway;
pub mod render;
