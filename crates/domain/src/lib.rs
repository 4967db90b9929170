//! Shared domain types used across all SerialAgent crates: config schema,
//! the provider-agnostic message/tool/stream model, capability metadata,
//! and the common error type.

pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
