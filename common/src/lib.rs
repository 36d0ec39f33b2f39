//! Shared building blocks for the proxy: the signed token codec and the access session claims.
//!
//! This crate provides:
//! - HS256 signing and verification of compact claim sets
//! - The access session claims with issuer, audience and expiry checks
//! - Constant-time comparison helpers
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]
#![expect(
    clippy::missing_errors_doc,
    reason = "The situation it maps to errors should be obvious."
)]

extern crate alloc;
extern crate core;

mod access;
mod compare;
mod token;

pub use access::*;
pub use compare::*;
pub use token::*;
