//! Integration test utilities for the cord client
//!
//! Drives a full [`cord_client::Client`] against a scripted REST transport
//! and an in-memory gateway.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
