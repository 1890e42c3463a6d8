use chrono::{Duration, Utc};
use replay_server::importer::{ImportConfig, ImportManager};
use replay_server::provider::{BackoffPolicy, ProviderConfig, ProviderGateway};
use replay_server::recommend::RecommendationEngine;
use replay_server::server::{make_app, make_state, RequestsLoggingLevel, ServerConfig};
use replay_server::SqliteLibraryStore;
use replay_server::library_store::StoredToken;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::MockProvider;

/// A full server instance backed by a temp database and a mock provider,
/// listening on a random local port.
pub struct TestServer {
    pub port: u16,
    pub store: SqliteLibraryStore,
    pub provider: MockProvider,
    _db_dir: TempDir,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let provider = MockProvider::spawn().await;

        let db_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = db_dir.path().join("library.db");
        let store = SqliteLibraryStore::new(&db_path).expect("Failed to open store");

        let gateway = Arc::new(
            ProviderGateway::new(
                ProviderConfig {
                    api_base: provider.base_url.clone(),
                    token_url: provider.token_url.clone(),
                    client_id: "test-client-id".to_string(),
                    client_secret: "test-client-secret".to_string(),
                },
                store.clone(),
                BackoffPolicy {
                    max_retries: 2,
                    jitter_ms: 1,
                },
                5,
            )
            .expect("Failed to build provider gateway"),
        );

        let import_manager = Arc::new(ImportManager::new(
            store.clone(),
            gateway.clone(),
            ImportConfig::default(),
        ));
        let recommender = Arc::new(RecommendationEngine::new(store.clone(), gateway.clone()));

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            ..ServerConfig::default()
        };
        let state = make_state(config, store.clone(), gateway, import_manager, recommender);
        let app = make_app(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind server port");
        let port = listener
            .local_addr()
            .expect("Failed to get server address")
            .port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server stopped");
        });

        TestServer {
            port,
            store,
            provider,
            _db_dir: db_dir,
            _shutdown: shutdown_tx,
        }
    }

    /// Creates the user and stores a valid provider token for them.
    pub fn link_user(&self, handle: &str) -> i64 {
        let rowid = self
            .store
            .ensure_user(handle)
            .expect("Failed to create user");
        self.store
            .save_token(
                rowid,
                &StoredToken {
                    access_token: "test-access-token".to_string(),
                    refresh_token: "test-refresh-token".to_string(),
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .expect("Failed to store token");
        rowid
    }

    /// Same as [`link_user`] but with an already expired access token, so the
    /// first provider call goes through the token endpoint.
    pub fn link_user_expired(&self, handle: &str) -> i64 {
        let rowid = self
            .store
            .ensure_user(handle)
            .expect("Failed to create user");
        self.store
            .save_token(
                rowid,
                &StoredToken {
                    access_token: "stale-access-token".to_string(),
                    refresh_token: "test-refresh-token".to_string(),
                    expires_at: Utc::now() - Duration::hours(1),
                },
            )
            .expect("Failed to store token");
        rowid
    }
}
