//! Exponential backoff policies.
//!
//! Two policies ship: [`RetryPolicy::generic`] for query-layer retries and
//! [`RetryPolicy::token_validation`] for the dedicated validation path. `max_retries` counts
//! retries after the initial attempt.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	error::{ApiError, ApiErrorKind},
};

/// Backoff schedule: `delay = base * 2^retry`, capped at the ceiling, plus optional jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
	/// Delay before the first retry, in milliseconds.
	pub base_delay_ms: u64,
	/// Upper bound applied before jitter, in milliseconds.
	pub max_delay_ms: u64,
	/// Retries allowed after the initial attempt.
	pub max_retries: u32,
	/// Upper bound of the uniformly random extra delay, in milliseconds.
	pub jitter_ms: u64,
}
impl RetryPolicy {
	/// Query-layer policy: 1 s base, 5 s ceiling, 2 retries, no jitter.
	pub const fn generic() -> Self {
		Self { base_delay_ms: 1_000, max_delay_ms: 5_000, max_retries: 2, jitter_ms: 0 }
	}

	/// Token-validation policy: 1 s base, 10 s ceiling, 2 retries, up to 1 s jitter.
	pub const fn token_validation() -> Self {
		Self { base_delay_ms: 1_000, max_delay_ms: 10_000, max_retries: 2, jitter_ms: 1_000 }
	}

	/// Deterministic part of the delay before retry number `retry` (zero-based).
	pub fn backoff(&self, retry: u32) -> Duration {
		let factor = 1_u64.checked_shl(retry).unwrap_or(u64::MAX);
		let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

		Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
	}

	/// Full delay before retry number `retry`, jitter included.
	pub fn delay_for(&self, retry: u32) -> Duration {
		let jitter = if self.jitter_ms == 0 {
			0
		} else {
			rand::rng().random_range(0..=self.jitter_ms)
		};

		self.backoff(retry) + Duration::milliseconds(i64::try_from(jitter).unwrap_or(0))
	}

	/// Returns `true` while retries remain.
	pub fn has_retries_left(&self, retries_done: u32) -> bool {
		retries_done < self.max_retries
	}

	/// Generic-path decision: retries remain and the failure kind is retryable.
	pub fn should_retry(&self, retries_done: u32, error: &ApiError) -> bool {
		self.has_retries_left(retries_done) && is_retryable(error.kind())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::generic()
	}
}

/// Kinds the generic path retries.
///
/// Auth failures only retry through token validation; permission, validation, and rate-limit
/// failures would fail the same way again.
pub fn is_retryable(kind: ApiErrorKind) -> bool {
	matches!(
		kind,
		ApiErrorKind::Network | ApiErrorKind::Timeout | ApiErrorKind::Server | ApiErrorKind::Unknown
	)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::ApiStatus;

	#[test]
	fn generic_backoff_doubles_until_ceiling() {
		let policy = RetryPolicy::generic();

		assert_eq!(policy.backoff(0), Duration::seconds(1));
		assert_eq!(policy.backoff(1), Duration::seconds(2));
		assert_eq!(policy.backoff(2), Duration::seconds(4));
		assert_eq!(policy.backoff(3), Duration::seconds(5));
		assert_eq!(policy.backoff(200), Duration::seconds(5));
		assert_eq!(policy.delay_for(1), Duration::seconds(2));
	}

	#[test]
	fn validation_jitter_stays_within_one_second() {
		let policy = RetryPolicy::token_validation();

		for _ in 0..64 {
			let delay = policy.delay_for(1);

			assert!(delay >= Duration::seconds(2));
			assert!(delay <= Duration::seconds(3));
		}
	}

	#[test]
	fn generic_path_skips_credential_and_throttle_failures() {
		let policy = RetryPolicy::generic();
		let error = |kind| ApiError::new(kind, ApiStatus::Symbolic("TEST"), "test");

		assert!(policy.should_retry(0, &error(ApiErrorKind::Network)));
		assert!(policy.should_retry(1, &error(ApiErrorKind::Server)));
		assert!(!policy.should_retry(2, &error(ApiErrorKind::Timeout)));

		for kind in [
			ApiErrorKind::Auth,
			ApiErrorKind::Permission,
			ApiErrorKind::Validation,
			ApiErrorKind::RateLimit,
		] {
			assert!(!policy.should_retry(0, &error(kind)));
		}
	}
}
