//! Router assembly and TLS setup for the HTTP listener.

pub mod router;
pub mod tls;
