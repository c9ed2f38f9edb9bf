//! Client-side token buckets keyed by endpoint and (optionally) user.
//!
//! Buckets are created lazily on first use and start full. A limit configured for an endpoint
//! applies to every user of that endpoint, while each `(endpoint, user)` pair drains its own
//! bucket. Endpoints without a configured limit are never throttled.

pub mod bucket;

pub use bucket::*;

// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
};

/// Limit applied to one endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointLimit {
	capacity: u32,
	interval_ms: u64,
	max_wait_ms: u64,
}
impl EndpointLimit {
	/// Creates a limit; a zero capacity is raised to one.
	pub fn new(capacity: u32, interval_ms: u64, max_wait_ms: u64) -> Self {
		Self { capacity: capacity.max(1), interval_ms, max_wait_ms }
	}

	/// Tokens granted per interval (and the bucket ceiling).
	pub fn capacity(&self) -> u32 {
		self.capacity
	}

	/// Refill interval.
	pub fn interval(&self) -> Duration {
		Duration::milliseconds(i64::try_from(self.interval_ms).unwrap_or(i64::MAX))
	}

	/// Longest single suspension [`RateLimiter::wait_for_token`] will accept.
	pub fn max_wait(&self) -> Duration {
		Duration::milliseconds(i64::try_from(self.max_wait_ms).unwrap_or(i64::MAX))
	}
}

/// Outcome of [`RateLimiter::evaluate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// A token is available now.
	Allow,
	/// The bucket is empty.
	Delay(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow)
	}
}

/// Advises callers when a throttled endpoint frees up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant the next token is minted.
	pub earliest_retry_at: OffsetDateTime,
	/// Time left until then.
	pub recommended_backoff: Duration,
}

/// Per-endpoint, per-user token-bucket limiter.
pub struct RateLimiter {
	clock: Arc<dyn Clock>,
	limits: RwLock<HashMap<String, EndpointLimit>>,
	buckets: Mutex<HashMap<String, RateBucket>>,
}
impl RateLimiter {
	/// Creates a limiter with no configured endpoints.
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { clock, limits: Default::default(), buckets: Default::default() }
	}

	/// Creates a limiter with the built-in auth endpoint policy.
	pub fn with_default_policy(clock: Arc<dyn Clock>) -> Self {
		let limiter = Self::new(clock);

		for (endpoint, limit) in default_policy() {
			limiter.configure_endpoint(endpoint, limit);
		}

		limiter
	}

	/// Installs or replaces the limit for `endpoint`.
	///
	/// Existing buckets for the endpoint are dropped so the new capacity applies immediately.
	pub fn configure_endpoint(&self, endpoint: impl Into<String>, limit: EndpointLimit) {
		let endpoint = endpoint.into();

		self.buckets.lock().retain(|key, _| !key_matches(key, &endpoint));
		self.limits.write().insert(endpoint, limit);
	}

	/// Limit configured for `endpoint`, if any.
	pub fn limit_for(&self, endpoint: &str) -> Option<EndpointLimit> {
		self.limits.read().get(endpoint).copied()
	}

	/// Returns `true` when a token is available right now. Never consumes.
	pub fn check_rate_limit(&self, endpoint: &str, user_id: Option<&str>) -> bool {
		self.evaluate(endpoint, user_id).is_allowed()
	}

	/// Non-consuming check that also reports when the next token arrives.
	pub fn evaluate(&self, endpoint: &str, user_id: Option<&str>) -> RateLimitDecision {
		let Some(limit) = self.limit_for(endpoint) else {
			return RateLimitDecision::Allow;
		};
		let now = self.clock.now();
		let mut buckets = self.buckets.lock();
		let bucket = refreshed(&mut buckets, bucket_key(endpoint, user_id), &limit, now);

		if bucket.tokens() > 0 {
			return RateLimitDecision::Allow;
		}

		let recommended_backoff = bucket.time_to_next(&limit, now);

		RateLimitDecision::Delay(RetryDirective {
			earliest_retry_at: now + recommended_backoff,
			recommended_backoff,
		})
	}

	/// Consumes a token, suspending at most once for `min(time_to_next, max_wait)`.
	///
	/// Returns `false` when no token is available after that single wait.
	pub async fn wait_for_token(&self, endpoint: &str, user_id: Option<&str>) -> bool {
		let Some(limit) = self.limit_for(endpoint) else {
			return true;
		};
		let wait = match self.try_acquire(endpoint, user_id, &limit) {
			Ok(()) => return true,
			Err(wait) => wait,
		};
		let bounded = if wait > limit.max_wait() { limit.max_wait() } else { wait };

		if bounded.is_positive() {
			tracing::debug!(
				endpoint,
				wait_ms = bounded.whole_milliseconds() as i64,
				"Waiting for rate-limit token."
			);
			clock::sleep(bounded).await;
		}

		let granted = self.try_acquire(endpoint, user_id, &limit).is_ok();

		if !granted {
			tracing::warn!(endpoint, "Rate limit exhausted.");
		}

		granted
	}

	/// Time until the next token for `(endpoint, user)`; zero when one is available.
	pub fn get_remaining_wait_time(&self, endpoint: &str, user_id: Option<&str>) -> Duration {
		match self.evaluate(endpoint, user_id) {
			RateLimitDecision::Allow => Duration::ZERO,
			RateLimitDecision::Delay(directive) => directive.recommended_backoff,
		}
	}

	/// Tokens currently available for `(endpoint, user)`; `None` for unlimited endpoints.
	pub fn available_tokens(&self, endpoint: &str, user_id: Option<&str>) -> Option<u32> {
		let limit = self.limit_for(endpoint)?;
		let now = self.clock.now();
		let mut buckets = self.buckets.lock();

		Some(refreshed(&mut buckets, bucket_key(endpoint, user_id), &limit, now).tokens())
	}

	/// Drops the bucket for `(endpoint, user)`, so the next use starts full.
	pub fn reset(&self, endpoint: &str, user_id: Option<&str>) {
		self.buckets.lock().remove(&bucket_key(endpoint, user_id));
	}

	/// Drops every bucket. Configured limits are kept.
	pub fn reset_all(&self) {
		self.buckets.lock().clear();
	}

	fn try_acquire(
		&self,
		endpoint: &str,
		user_id: Option<&str>,
		limit: &EndpointLimit,
	) -> Result<(), Duration> {
		let now = self.clock.now();
		let mut buckets = self.buckets.lock();
		let bucket = refreshed(&mut buckets, bucket_key(endpoint, user_id), limit, now);

		if bucket.try_consume() { Ok(()) } else { Err(bucket.time_to_next(limit, now)) }
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("limits", &*self.limits.read())
			.field("buckets", &self.buckets.lock().len())
			.finish()
	}
}

/// Built-in limits for the authentication endpoints.
pub fn default_policy() -> Vec<(&'static str, EndpointLimit)> {
	vec![
		("/auth/login", EndpointLimit::new(5, 60_000, 0)),
		("/auth/signup", EndpointLimit::new(3, 60_000, 0)),
		("/auth/validate", EndpointLimit::new(10, 60_000, 5_000)),
		("/auth/refresh", EndpointLimit::new(10, 60_000, 5_000)),
	]
}

fn bucket_key(endpoint: &str, user_id: Option<&str>) -> String {
	match user_id {
		Some(user) => format!("{endpoint}:{user}"),
		None => endpoint.to_owned(),
	}
}

fn key_matches(key: &str, endpoint: &str) -> bool {
	key == endpoint || key.strip_prefix(endpoint).is_some_and(|rest| rest.starts_with(':'))
}

fn refreshed<'a>(
	buckets: &'a mut HashMap<String, RateBucket>,
	key: String,
	limit: &EndpointLimit,
	now: OffsetDateTime,
) -> &'a mut RateBucket {
	let bucket = buckets.entry(key).or_insert_with(|| RateBucket::full(limit, now));

	bucket.refill(limit, now);

	bucket
}
