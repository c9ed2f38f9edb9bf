// self
use crate::{
	_prelude::*,
	obs::{OpKind, OpOutcome},
};

/// Counts one operation outcome on the global recorder.
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"session_resilience_op_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records how long a pipeline call took, split by whether it crossed the slow threshold.
pub fn record_request_latency(elapsed: Duration, slow: bool) {
	#[cfg(feature = "metrics")]
	{
		let slow = if slow { "true" } else { "false" };

		metrics::histogram!("session_resilience_request_duration_seconds", "slow" => slow)
			.record(elapsed.as_seconds_f64().max(0.));
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = (elapsed, slow);
	}
}
