//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - In-memory Endpoint with failure injection
//! - Row/column construction helpers

pub mod mock_endpoint;

pub use mock_endpoint::*;
