//! Ordered fallback over provider call strategies.
//!
//! One combinator replaces the per-call-site try/catch ladders: the first
//! strategy yielding at least one item wins, a client rejection (4xx) moves
//! on to the next strategy, anything else aborts the whole chain.

use super::gateway::ProviderError;
use std::future::Future;
use tracing::debug;

#[derive(Debug)]
pub enum FallbackFailure {
    /// Every strategy ran but none produced any items.
    AllEmpty,
    /// Every strategy was rejected by the provider with a 4xx.
    AllRejected,
    /// An auth or availability error aborted the chain.
    Aborted(ProviderError),
}

/// Run `call` against each strategy in order. Returns the index of the
/// winning strategy together with its items.
pub async fn try_strategies<S, T, F, Fut>(
    strategies: &[S],
    mut call: F,
) -> Result<(usize, Vec<T>), FallbackFailure>
where
    S: std::fmt::Debug,
    F: FnMut(&S) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ProviderError>>,
{
    let mut any_ran_clean = false;
    for (index, strategy) in strategies.iter().enumerate() {
        match call(strategy).await {
            Ok(items) if !items.is_empty() => return Ok((index, items)),
            Ok(_) => {
                debug!("Strategy {:?} returned no items, trying next", strategy);
                any_ran_clean = true;
            }
            Err(err) if err.is_client_rejection() => {
                debug!("Strategy {:?} rejected ({}), trying next", strategy, err);
            }
            Err(err) => return Err(FallbackFailure::Aborted(err)),
        }
    }
    if any_ran_clean {
        Err(FallbackFailure::AllEmpty)
    } else {
        Err(FallbackFailure::AllRejected)
    }
}
