mod error;
mod import_routes;
pub mod metrics;
mod rec_routes;
mod requests_logging;
pub mod server;
mod stats_routes;
pub mod state;

pub use requests_logging::RequestsLoggingLevel;
pub use server::{make_app, make_state, run_server};
pub use state::{ServerConfig, ServerState};
