mod backoff;
mod fallback;
mod gateway;
pub mod models;

pub use backoff::BackoffPolicy;
pub use fallback::{try_strategies, FallbackFailure};
pub use gateway::{ProviderConfig, ProviderError, ProviderGateway};
