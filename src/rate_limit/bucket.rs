//! Token-bucket arithmetic.

// self
use crate::{_prelude::*, rate_limit::EndpointLimit};

/// Token count and refill timestamp for one `(endpoint, user)` pair.
///
/// `tokens` stays within `0..=capacity`; `last_refill` only moves forward, and only by whole
/// intervals so partial progress toward the next refill is preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateBucket {
	tokens: u32,
	last_refill: OffsetDateTime,
}
impl RateBucket {
	/// Creates a full bucket.
	pub fn full(limit: &EndpointLimit, now: OffsetDateTime) -> Self {
		Self { tokens: limit.capacity(), last_refill: now }
	}

	/// Tokens currently available.
	pub fn tokens(&self) -> u32 {
		self.tokens
	}

	/// Instant of the last whole-interval refill.
	pub fn last_refill(&self) -> OffsetDateTime {
		self.last_refill
	}

	/// Adds `floor(elapsed / interval) * capacity` tokens, capped at capacity.
	pub fn refill(&mut self, limit: &EndpointLimit, now: OffsetDateTime) {
		if now <= self.last_refill {
			return;
		}

		let interval_ms = limit.interval().whole_milliseconds();

		if interval_ms <= 0 {
			self.tokens = limit.capacity();
			self.last_refill = now;

			return;
		}

		let elapsed_ms = (now - self.last_refill).whole_milliseconds();
		let intervals = elapsed_ms / interval_ms;

		if intervals == 0 {
			return;
		}

		let added = u64::try_from(intervals)
			.unwrap_or(u64::MAX)
			.saturating_mul(u64::from(limit.capacity()));
		let total = u64::from(self.tokens).saturating_add(added);

		self.tokens = u32::try_from(total.min(u64::from(limit.capacity()))).unwrap_or(u32::MAX);
		self.last_refill +=
			Duration::milliseconds(i64::try_from(intervals * interval_ms).unwrap_or(i64::MAX));
	}

	/// Takes one token if available.
	pub fn try_consume(&mut self) -> bool {
		if self.tokens == 0 {
			return false;
		}

		self.tokens -= 1;

		true
	}

	/// Time until the next token becomes available (zero if one already is).
	pub fn time_to_next(&self, limit: &EndpointLimit, now: OffsetDateTime) -> Duration {
		if self.tokens > 0 {
			return Duration::ZERO;
		}

		let wait = self.last_refill + limit.interval() - now;

		if wait.is_negative() { Duration::ZERO } else { wait }
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const T0: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	#[test]
	fn refill_preserves_partial_intervals() {
		let limit = EndpointLimit::new(2, 1_000, 0);
		let mut bucket = RateBucket::full(&limit, T0);

		assert!(bucket.try_consume());
		assert!(bucket.try_consume());
		assert!(!bucket.try_consume());

		bucket.refill(&limit, T0 + Duration::milliseconds(2_500));

		assert_eq!(bucket.tokens(), 2);
		assert_eq!(bucket.last_refill(), T0 + Duration::seconds(2));

		bucket.try_consume();
		bucket.try_consume();

		assert_eq!(
			bucket.time_to_next(&limit, T0 + Duration::milliseconds(2_500)),
			Duration::milliseconds(500)
		);
	}

	#[test]
	fn refill_never_exceeds_capacity_or_moves_backwards() {
		let limit = EndpointLimit::new(5, 60_000, 0);
		let mut bucket = RateBucket::full(&limit, T0);

		bucket.refill(&limit, T0 + Duration::hours(10));

		assert_eq!(bucket.tokens(), 5);

		let before = bucket;

		bucket.refill(&limit, T0);

		assert_eq!(bucket, before);
	}
}
