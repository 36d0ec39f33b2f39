//! Configuration management for the proxy: validated settings derived from the CLI and environment.
//!
//! This module provides the configuration data types and the loader that
//! validates raw arguments into them.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
