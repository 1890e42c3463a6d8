//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests:
//! a mock music provider, an isolated server instance per test, a thin HTTP
//! client, and fixture builders. Tests should only import from this module,
//! not from internal submodules.

mod client;
mod fixtures;
mod provider;
mod server;

// Public API - this is what tests import
pub use client::{json_body, TestClient};
pub use fixtures::*;
pub use provider::{MockProvider, MockProviderState};
pub use server::TestServer;
