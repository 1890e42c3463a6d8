mod models;
mod schema;
mod store;

pub use models::*;
pub use schema::LIBRARY_VERSIONED_SCHEMAS;
pub use store::SqliteLibraryStore;
