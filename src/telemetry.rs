//! Telemetry events, batches, and the sink they are delivered to.
//!
//! Delivery is fire-and-forget: sink failures are logged by the batcher and never reach the
//! code that produced the event.

pub mod batcher;
pub mod sink;

pub use batcher::*;
pub use sink::*;

// self
use crate::{_prelude::*, http::TransportFailure};

/// Boxed future returned by [`MetricsSink::send`].
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + 'a + Send>>;

/// Destination for metric batches.
pub trait MetricsSink
where
	Self: Send + Sync,
{
	/// Delivers `batch`.
	fn send(&self, batch: MetricBatch) -> SinkFuture<'_>;

	/// Synchronous, best-effort hand-off used during teardown. Returns `true` when the batch was
	/// accepted for delivery.
	fn send_beacon(&self, batch: MetricBatch) -> bool;
}

/// Why a batch could not be delivered.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SinkError {
	/// The ingest call produced no response.
	#[error(transparent)]
	Transport(#[from] TransportFailure),
	/// The ingest endpoint answered with a non-success status.
	#[error("Metrics ingest rejected the batch with status {status}.")]
	Rejected {
		/// HTTP status returned by the ingest endpoint.
		status: u16,
	},
}

/// Event category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
	/// Session lifecycle event (login, token use, expiry, permission denial).
	Auth,
	/// API call outcome.
	Api,
	/// Page-level event.
	Page,
}

/// Immutable telemetry record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEvent {
	/// Category.
	#[serde(rename = "type")]
	pub kind: MetricKind,
	/// Event name, or the URL for API events.
	pub name: String,
	/// HTTP method for API events.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	/// HTTP status, when one was received.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<u16>,
	/// Duration in milliseconds.
	pub duration_ms: u64,
	/// Creation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	/// Outcome flag.
	pub success: bool,
	/// Error description for failed events.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Subject the event is attributed to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	/// Free-form tags.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub tags: BTreeMap<String, String>,
}
impl MetricEvent {
	/// Session lifecycle event.
	pub fn auth(name: impl Into<String>, success: bool, timestamp: OffsetDateTime) -> Self {
		Self {
			kind: MetricKind::Auth,
			name: name.into(),
			method: None,
			status: None,
			duration_ms: 0,
			timestamp,
			success,
			error: None,
			user_id: None,
			tags: BTreeMap::new(),
		}
	}

	/// API call outcome.
	pub fn request(
		method: impl Into<String>,
		url: impl Into<String>,
		status: Option<u16>,
		duration: Duration,
		timestamp: OffsetDateTime,
	) -> Self {
		let success = status.is_some_and(|status| (200..300).contains(&status));

		Self {
			kind: MetricKind::Api,
			name: url.into(),
			method: Some(method.into()),
			status,
			duration_ms: u64::try_from(duration.whole_milliseconds()).unwrap_or(0),
			timestamp,
			success,
			error: None,
			user_id: None,
			tags: BTreeMap::new(),
		}
	}

	/// Marks the event failed with `error`.
	pub fn with_error(mut self, error: impl Into<String>) -> Self {
		self.success = false;
		self.error = Some(error.into());

		self
	}

	/// Attributes the event to `user_id`.
	pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());

		self
	}

	/// Adds a tag.
	pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.tags.insert(key.into(), value.into());

		self
	}

	/// Dedup key for API events (`METHOD url`).
	pub fn dedup_key(&self) -> String {
		format!("{} {}", self.method.as_deref().unwrap_or("-"), self.name)
	}
}

/// Wire body of `POST /metrics/request`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBatch {
	/// Unique batch id.
	pub batch_id: String,
	/// Events in the batch.
	pub metrics: Vec<MetricEvent>,
}
impl MetricBatch {
	/// Wraps `metrics` under a fresh batch id.
	pub fn new(metrics: Vec<MetricEvent>, now: OffsetDateTime) -> Self {
		let millis = now.unix_timestamp_nanos() / 1_000_000;

		Self { batch_id: format!("batch_{millis}_{:08x}", rand::random::<u32>()), metrics }
	}

	/// Number of events.
	pub fn len(&self) -> usize {
		self.metrics.len()
	}

	/// Returns `true` for an empty batch.
	pub fn is_empty(&self) -> bool {
		self.metrics.is_empty()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn batch_serializes_in_ingest_shape() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let event =
			MetricEvent::request("GET", "/words", Some(503), Duration::milliseconds(1_500), now)
				.with_error("Server error.")
				.with_user("user-1");
		let batch = MetricBatch::new(vec![event, MetricEvent::auth("token_used", true, now)], now);
		let json = serde_json::to_value(&batch).expect("Batch should serialize.");

		assert!(
			json["batchId"].as_str().is_some_and(|id| id.starts_with("batch_1735689600000_"))
		);
		assert_eq!(json["metrics"][0]["type"], "api");
		assert_eq!(json["metrics"][0]["durationMs"], 1_500);
		assert_eq!(json["metrics"][0]["userId"], "user-1");
		assert_eq!(json["metrics"][0]["success"], false);
		assert_eq!(json["metrics"][0]["timestamp"], "2025-01-01T00:00:00Z");
		assert_eq!(json["metrics"][1]["type"], "auth");
		assert!(json["metrics"][1].get("method").is_none());
	}

	#[test]
	fn request_success_follows_status() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		assert!(MetricEvent::request("GET", "/a", Some(204), Duration::ZERO, now).success);
		assert!(!MetricEvent::request("GET", "/a", Some(404), Duration::ZERO, now).success);
		assert!(!MetricEvent::request("GET", "/a", None, Duration::ZERO, now).success);
	}
}
