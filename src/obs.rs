//! Observability helpers shared by the pipeline, validator, supervisor, and batcher.
//!
//! Spans are named `session_resilience.op` and carry `op` + `stage` fields; pipeline spans add
//! `method` + `path`. With the `metrics` feature, outcomes increment
//! `session_resilience_op_total` (labeled by `op` + `outcome`) and completed pipeline calls
//! feed `session_resilience_request_duration_seconds`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// One pass through the HTTP pipeline.
	Request,
	/// Server-side token validation.
	Validation,
	/// Proactive token refresh.
	Refresh,
	/// Metrics batch delivery.
	MetricsFlush,
}
impl OpKind {
	/// Stable label for span and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Request => "request",
			OpKind::Validation => "validation",
			OpKind::Refresh => "refresh",
			OpKind::MetricsFlush => "metrics_flush",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure surfaced (or swallowed and logged).
	Failure,
	/// Rejected locally before the transport was touched.
	ShortCircuit,
	/// Another attempt scheduled after a retryable failure.
	Retry,
}
impl OpOutcome {
	/// Stable label for span and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::ShortCircuit => "short_circuit",
			OpOutcome::Retry => "retry",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
