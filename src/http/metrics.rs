//! Pipeline traffic counters.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for pipeline traffic.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
	requests: AtomicU64,
	failures: AtomicU64,
	short_circuits: AtomicU64,
	session_expirations: AtomicU64,
}
impl PipelineMetrics {
	/// Returns the number of calls that entered the pipeline.
	pub fn requests(&self) -> u64 {
		self.requests.load(Ordering::Relaxed)
	}

	/// Returns the number of calls that ended in a classified error (short-circuits included).
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	/// Returns the number of calls rejected before reaching the transport.
	pub fn short_circuits(&self) -> u64 {
		self.short_circuits.load(Ordering::Relaxed)
	}

	/// Returns the number of sessions cleared because of a 401.
	pub fn session_expirations(&self) -> u64 {
		self.session_expirations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_request(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_short_circuit(&self) {
		self.short_circuits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_session_expired(&self) {
		self.session_expirations.fetch_add(1, Ordering::Relaxed);
	}
}
