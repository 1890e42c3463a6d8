mod file_config;

pub use file_config::{FileConfig, ImportFileConfig, ProviderFileConfig};

use crate::importer::ImportConfig;
use crate::provider::{BackoffPolicy, ProviderConfig};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub run_retention_days: u64,
    pub prune_interval_hours: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub run_retention_days: u64,
    pub prune_interval_hours: u64,

    // Feature configs (with defaults)
    pub provider: ProviderConfig,
    pub backoff: BackoffPolicy,
    pub import: ImportConfig,
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let run_retention_days = file.run_retention_days.unwrap_or(cli.run_retention_days);
        let prune_interval_hours = file.prune_interval_hours.unwrap_or(cli.prune_interval_hours);

        let provider_file = file.provider.unwrap_or_default();
        let client_id = provider_file
            .client_id
            .or_else(|| cli.client_id.clone())
            .unwrap_or_default();
        let client_secret = provider_file
            .client_secret
            .or_else(|| cli.client_secret.clone())
            .unwrap_or_default();
        if client_id.is_empty() || client_secret.is_empty() {
            bail!("Provider client credentials must be set via CLI or config file");
        }
        let provider = ProviderConfig {
            api_base: provider_file
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token_url: provider_file
                .token_url
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            client_id,
            client_secret,
        };
        let backoff_defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy {
            max_retries: provider_file
                .max_retries
                .unwrap_or(backoff_defaults.max_retries),
            jitter_ms: provider_file.jitter_ms.unwrap_or(backoff_defaults.jitter_ms),
        };

        let import_file = file.import.unwrap_or_default();
        let import_defaults = ImportConfig::default();
        let import = ImportConfig {
            max_sync_pages: import_file
                .max_sync_pages
                .unwrap_or(import_defaults.max_sync_pages),
            chunk_size: import_file.chunk_size.unwrap_or(import_defaults.chunk_size),
            run_guard_minutes: import_file
                .run_guard_minutes
                .unwrap_or(import_defaults.run_guard_minutes),
        };

        Ok(AppConfig {
            db_path,
            port,
            metrics_port,
            logging_level,
            run_retention_days,
            prune_interval_hours,
            provider,
            backoff,
            import,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliConfig {
        CliConfig {
            db_path: Some(PathBuf::from("/tmp/replay.db")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            client_id: Some("cli-id".to_string()),
            client_secret: Some("cli-secret".to_string()),
            run_retention_days: 30,
            prune_interval_hours: 24,
        }
    }

    #[test]
    fn cli_values_used_without_file_config() {
        let config = AppConfig::resolve(&cli(), None).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.provider.client_id, "cli-id");
        assert_eq!(config.provider.api_base, DEFAULT_API_BASE);
        assert_eq!(config.import.chunk_size, 500);
    }

    #[test]
    fn file_values_override_cli() {
        let file: FileConfig = toml::from_str(
            r#"
            port = 8080

            [provider]
            client_id = "file-id"
            max_retries = 3

            [import]
            max_sync_pages = 5
            "#,
        )
        .unwrap();
        let config = AppConfig::resolve(&cli(), Some(file)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.provider.client_id, "file-id");
        assert_eq!(config.provider.client_secret, "cli-secret");
        assert_eq!(config.backoff.max_retries, 3);
        assert_eq!(config.import.max_sync_pages, 5);
    }

    #[test]
    fn missing_credentials_fail_resolution() {
        let mut args = cli();
        args.client_secret = None;
        assert!(AppConfig::resolve(&args, None).is_err());
    }
}
