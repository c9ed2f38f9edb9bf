// crates.io
use tracing::{Instrument, Span, instrument::Instrumented};
// self
use crate::{_prelude::*, obs::OpKind};

/// Span wrapper used around crate operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	span: Span,
}
impl OpSpan {
	/// Span tagged with `kind` and `stage`.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("session_resilience.op", op = kind.as_str(), stage) }
	}

	/// Pipeline span carrying the request line. `path` should already be normalized so query
	/// strings never reach the logs.
	pub fn request(method: &'static str, path: &str) -> Self {
		Self {
			span: tracing::info_span!(
				"session_resilience.op",
				op = OpKind::Request.as_str(),
				stage = "send",
				method,
				path
			),
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn request_span_wraps_the_call() {
		let span = OpSpan::request("GET", "/words");

		assert_eq!(OpSpan::instrument(&span, async { 7 }).await, 7);
	}
}
