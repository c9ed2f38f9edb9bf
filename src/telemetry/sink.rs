//! Ingest sink. Batches go straight to the transport, bypassing [`crate::http::ApiClient`], but
//! carry the same security headers as every pipeline call.

// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	http::{
		ApiRequest, ApiTransport, SecurityHeaders, TransportFailure, headers,
		routes::METRICS_INGEST_PATH,
	},
	telemetry::{MetricBatch, MetricsSink, SinkError, SinkFuture},
};

/// [`MetricsSink`] posting to `POST /metrics/request`.
#[derive(Clone)]
pub struct HttpMetricsSink {
	transport: Arc<dyn ApiTransport>,
	headers: Arc<SecurityHeaders>,
	clock: Arc<dyn Clock>,
}
impl HttpMetricsSink {
	/// Creates a sink stamping `headers` on every ingest call.
	pub fn new(
		transport: Arc<dyn ApiTransport>,
		headers: SecurityHeaders,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self { transport, headers: Arc::new(headers), clock }
	}

	fn request(&self, batch: &MetricBatch) -> Result<ApiRequest, SinkError> {
		let body = serde_json::to_value(batch).map_err(|e| {
			SinkError::Transport(TransportFailure::network(format!(
				"Metrics batch could not be encoded: {e}."
			)))
		})?;
		let now = self.clock.now();
		let mut request = ApiRequest::post(METRICS_INGEST_PATH, body);

		headers::stamp_start(&mut request, now);
		self.headers.apply(&mut request, now);

		Ok(request)
	}
}
impl MetricsSink for HttpMetricsSink {
	fn send(&self, batch: MetricBatch) -> SinkFuture<'_> {
		Box::pin(async move {
			let response = self.transport.send(self.request(&batch)?).await?;

			if response.is_success() {
				Ok(())
			} else {
				Err(SinkError::Rejected { status: response.status })
			}
		})
	}

	fn send_beacon(&self, batch: MetricBatch) -> bool {
		let request = match self.request(&batch) {
			Ok(request) => request,
			Err(e) => {
				tracing::warn!(error = %e, "Dropping unload batch.");

				return false;
			},
		};
		let transport = self.transport.clone();

		clock::spawn_detached("metrics_beacon", async move {
			if let Err(e) = transport.send(request).await {
				tracing::warn!(error = %e, "Unload metrics beacon failed.");
			}
		})
	}
}
impl Debug for HttpMetricsSink {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpMetricsSink").field("path", &METRICS_INGEST_PATH).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		_preludet::{self, ScriptedTransport},
		http::{FINGERPRINT_HEADER, Method, REQUEST_ID_HEADER, REQUEST_TIMESTAMP_HEADER},
		telemetry::MetricEvent,
	};

	fn sink(transport: &ScriptedTransport) -> HttpMetricsSink {
		let headers = SecurityHeaders::new(&_preludet::test_device_profile())
			.with_csrf_source(Arc::new(|| Some("csrf-ingest".to_owned())));

		HttpMetricsSink::new(Arc::new(transport.clone()), headers, _preludet::test_clock())
	}

	fn batch() -> MetricBatch {
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		MetricBatch::new(vec![MetricEvent::auth("login", true, now)], now)
	}

	#[tokio::test]
	async fn posts_batches_to_ingest_path() {
		let transport = ScriptedTransport::default();
		let sink = sink(&transport);
		let batch = batch();

		sink.send(batch.clone()).await.expect("Scripted ingest should accept the batch.");

		let requests = transport.requests();

		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].method, Method::Post);
		assert_eq!(requests[0].path, METRICS_INGEST_PATH);
		assert_eq!(
			requests[0].body.as_ref().and_then(|body| body.get("batchId")),
			Some(&serde_json::json!(batch.batch_id))
		);
	}

	#[tokio::test]
	async fn non_success_status_is_a_rejection() {
		let transport = ScriptedTransport::default();

		transport.push_json(503, serde_json::json!({}));

		let sink = sink(&transport);

		assert_eq!(sink.send(batch()).await, Err(SinkError::Rejected { status: 503 }));
	}

	#[tokio::test]
	async fn ingest_calls_carry_the_security_headers() {
		let transport = ScriptedTransport::default();

		sink(&transport).send(batch()).await.expect("Scripted ingest should accept the batch.");

		let request = &transport.requests()[0];

		assert_eq!(request.header("X-Frame-Options"), Some("DENY"));
		assert_eq!(request.header(REQUEST_ID_HEADER).map(str::len), Some(32));
		assert_eq!(request.header(REQUEST_TIMESTAMP_HEADER), Some("2025-06-01T12:00:00Z"));
		assert_eq!(
			request.header(FINGERPRINT_HEADER),
			Some(_preludet::test_device_profile().fingerprint().as_str())
		);
		assert_eq!(request.header(headers::CSRF_HEADER), Some("csrf-ingest"));
		assert!(request.header(headers::REQUEST_START_HEADER).is_some());
	}

	#[test]
	fn beacon_without_runtime_is_refused() {
		let sink = sink(&ScriptedTransport::default());

		assert!(!sink.send_beacon(batch()));
	}
}
