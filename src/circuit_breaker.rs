use failsafe::{backoff, failure_policy, CircuitBreaker, Config};
use std::future::Future;
use std::time::Duration;

use crate::errors::AppError;

/// Creates a circuit breaker for outbound provider calls (DNC registry, dialer).
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While OPEN, calls are rejected without touching the network. Callers treat a
/// rejection like any other provider failure.
pub fn create_provider_circuit_breaker() -> impl CircuitBreaker + Clone + Send + Sync + 'static {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Runs `request` through `breaker`, recording its outcome.
///
/// The breaker is consulted before the request starts so an open circuit never
/// issues the call.
pub async fn guarded<B, T, Fut>(breaker: &B, provider: &str, request: Fut) -> Result<T, AppError>
where
    B: CircuitBreaker,
    Fut: Future<Output = Result<T, AppError>>,
{
    if !breaker.is_call_permitted() {
        tracing::warn!("Circuit open for {}, rejecting call", provider);
        return Err(AppError::ProviderUnavailable(format!(
            "{} circuit is open",
            provider
        )));
    }

    let outcome = request.await;
    match breaker.call(|| outcome) {
        Ok(value) => Ok(value),
        Err(failsafe::Error::Inner(e)) => Err(e),
        Err(failsafe::Error::Rejected) => Err(AppError::ProviderUnavailable(format!(
            "{} circuit is open",
            provider
        ))),
    }
}
