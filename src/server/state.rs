use axum::extract::FromRef;

use crate::importer::ImportManager;
use crate::library_store::SqliteLibraryStore;
use crate::provider::ProviderGateway;
use crate::recommend::RecommendationEngine;
use std::sync::Arc;
use std::time::Instant;

use super::requests_logging::RequestsLoggingLevel;

pub type GuardedImportManager = Arc<ImportManager>;
pub type GuardedRecommendationEngine = Arc<RecommendationEngine>;
pub type GuardedProviderGateway = Arc<ProviderGateway>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub requests_logging_level: RequestsLoggingLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3001,
            metrics_port: 9091,
            requests_logging_level: RequestsLoggingLevel::default(),
        }
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub store: SqliteLibraryStore,
    pub gateway: GuardedProviderGateway,
    pub import_manager: GuardedImportManager,
    pub recommender: GuardedRecommendationEngine,
    pub hash: String,
}

impl FromRef<ServerState> for SqliteLibraryStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for GuardedImportManager {
    fn from_ref(input: &ServerState) -> Self {
        input.import_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedRecommendationEngine {
    fn from_ref(input: &ServerState) -> Self {
        input.recommender.clone()
    }
}

impl FromRef<ServerState> for GuardedProviderGateway {
    fn from_ref(input: &ServerState) -> Self {
        input.gateway.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
