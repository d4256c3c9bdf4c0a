use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

use crate::{error::FactoryError, physical::{PhysicalConnection, PhysicalFactory}};

/// Shape of the exponential backoff used between reconnect attempts.
///
/// Deliberately has no `max_elapsed_time` field: the backoff never gives up on its own.
/// The overall retry deadline is enforced separately, by wrapping the retry loop in a
/// [`tokio::time::timeout`] — see [`connect_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub initial_interval: Duration,
	pub randomization_factor: f64,
	pub multiplier: f64,
	pub max_interval: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { initial_interval: Duration::from_millis(500), randomization_factor: 0.5, multiplier: 1.5, max_interval: Duration::from_secs(60) }
	}
}

impl RetryPolicy {
	fn build(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_interval)
			.with_randomization_factor(self.randomization_factor)
			.with_multiplier(self.multiplier)
			.with_max_interval(self.max_interval)
			.with_max_elapsed_time(None)
			.build()
	}
}

/// Retries `factory.connect(url)` with exponential backoff until it succeeds or `deadline`
/// elapses.
///
/// Every error from the factory is treated as transient and retried; there is currently no
/// way for a factory to signal a permanent failure that should abort the retry loop early.
pub(crate) async fn connect_with_backoff(factory: &dyn PhysicalFactory, url: &str, policy: &RetryPolicy, deadline: Duration) -> Result<PhysicalConnection, FactoryError> {
	let backoff = policy.build();
	let attempt = || async { factory.connect(url).await.map_err(backoff::Error::transient) };
	match tokio::time::timeout(deadline, backoff::future::retry(backoff, attempt)).await {
		Ok(Ok(physical)) => Ok(physical),
		Ok(Err(error)) => Err(error),
		Err(_elapsed) => Err(FactoryError::DeadlineExceeded),
	}
}
