//! Replay Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod aggregation;
pub mod config;
pub mod importer;
pub mod library_store;
pub mod provider;
pub mod recommend;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use library_store::SqliteLibraryStore;
pub use server::{make_app, make_state, run_server, RequestsLoggingLevel, ServerConfig};
