//! HTTP surface of the proxy.
//!
//! Defines the object delivery handlers, the authentication gate and OIDC flow,
//! and the router with its middleware stack.

pub mod auth;
pub mod objects;
pub mod server;

pub use server::router::create_app;
