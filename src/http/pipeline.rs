//! Interceptor pipeline wrapped around an [`ApiTransport`].
//!
//! Request phase: stamp the start marker, apply the security headers, throttle auth-family
//! endpoints, and attach the bearer token where the path requires one. Local rejections
//! short-circuit with a classified [`ApiError`] before the transport is touched.
//!
//! Response phase: slow successes are reported; a 401 on a protected path clears the session;
//! 403 and 429 get their own events; every other failure produces one generic event unless it
//! was already reported as auth or rate-limit.

// self
use crate::{
	_prelude::*,
	auth::{InvalidationReason, SessionStore},
	classify::{self, LocalFailure, RawFailure},
	clock::{self, Clock},
	error::{ApiError, ApiErrorKind},
	http::{
		ApiRequest, ApiResponse, ApiTransport, CsrfTokenSource, Method, PipelineMetrics,
		SecurityHeaders, TransportFailure,
		headers::{self, REQUIRED_PERMISSION_HEADER},
		routes,
	},
	notify::NotificationGate,
	obs::{self, OpKind, OpOutcome, OpSpan},
	rate_limit::RateLimiter,
	retry::RetryPolicy,
	telemetry::{MetricEvent, MetricsBatcher},
};

/// Successful calls slower than this are reported.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::seconds(1);

/// HTTP client that runs every call through the interceptor pipeline.
pub struct ApiClient {
	transport: Arc<dyn ApiTransport>,
	session: Arc<SessionStore>,
	limiter: Arc<RateLimiter>,
	batcher: MetricsBatcher,
	headers: SecurityHeaders,
	clock: Arc<dyn Clock>,
	retry: RetryPolicy,
	notices: Option<Arc<NotificationGate>>,
	metrics: Arc<PipelineMetrics>,
}
impl ApiClient {
	/// Creates a client; the device fingerprint comes from the session store's profile.
	pub fn new(
		transport: Arc<dyn ApiTransport>,
		session: Arc<SessionStore>,
		limiter: Arc<RateLimiter>,
		batcher: MetricsBatcher,
	) -> Self {
		let headers = SecurityHeaders::new(session.store().profile());
		let clock = session.clock().clone();

		Self {
			transport,
			session,
			limiter,
			batcher,
			headers,
			clock,
			retry: RetryPolicy::generic(),
			notices: None,
			metrics: Default::default(),
		}
	}

	/// Installs the CSRF token source used for state-changing calls.
	pub fn with_csrf_source(mut self, csrf: Arc<dyn CsrfTokenSource>) -> Self {
		self.headers = self.headers.with_csrf_source(csrf);

		self
	}

	/// Overrides the policy used by [`ApiClient::send_with_retry`].
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Routes classified failures to a notification gate.
	pub fn with_notifications(mut self, notices: Arc<NotificationGate>) -> Self {
		self.notices = Some(notices);

		self
	}

	/// Pipeline counters.
	pub fn metrics(&self) -> &PipelineMetrics {
		&self.metrics
	}

	/// Session store the client reads tokens from.
	pub fn session(&self) -> &Arc<SessionStore> {
		&self.session
	}

	/// Rate limiter consulted for auth-family endpoints.
	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// Telemetry batcher the pipeline reports to.
	pub fn batcher(&self) -> &MetricsBatcher {
		&self.batcher
	}

	/// Sends `GET path`.
	pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
		self.send(ApiRequest::get(path)).await
	}

	/// Runs `request` through the pipeline once.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
		let span = OpSpan::request(request.method.as_str(), &routes::normalize(&request.path));

		obs::record_op_outcome(OpKind::Request, OpOutcome::Attempt);

		let result = span.instrument(self.dispatch(request)).await;

		match &result {
			Ok(_) => obs::record_op_outcome(OpKind::Request, OpOutcome::Success),
			Err(e) => {
				obs::record_op_outcome(OpKind::Request, OpOutcome::Failure);
				self.metrics.record_failure();

				if let Some(notices) = &self.notices {
					notices.notify_error(e);
				}
			},
		}

		result
	}

	/// Runs `request` through the pipeline, retrying retryable failures with backoff.
	///
	/// Only `network`, `timeout`, `server`, and `unknown` failures are retried.
	pub async fn send_with_retry(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
		let mut retries = 0;

		loop {
			match self.send(request.clone()).await {
				Ok(response) => return Ok(response),
				Err(e) if self.retry.should_retry(retries, &e) => {
					let delay = self.retry.delay_for(retries);

					tracing::debug!(
						path = %request.path,
						kind = %e.kind(),
						retry = retries + 1,
						delay_ms = delay.whole_milliseconds() as i64,
						"Retrying request."
					);
					obs::record_op_outcome(OpKind::Request, OpOutcome::Retry);
					clock::sleep(delay).await;

					retries += 1;
				},
				Err(e) => return Err(e),
			}
		}
	}

	async fn dispatch(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
		let now = self.clock.now();
		let path = routes::normalize(&request.path);

		self.metrics.record_request();
		headers::stamp_start(&mut request, now);
		self.headers.apply(&mut request, now);

		if routes::is_auth_family(&path) && !self.limiter.wait_for_token(&path, None).await {
			let wait = self.limiter.get_remaining_wait_time(&path, None);

			return Err(self.reject(&request, &path, LocalFailure::RateLimited { wait }));
		}
		if routes::requires_auth(&path) {
			let Some(token) = self.session.get_token() else {
				return Err(self.reject(&request, &path, LocalFailure::MissingToken));
			};

			request.set_header("authorization", token.authorization_value());
			self.batcher.track_auth_event(
				MetricEvent::auth("token_used", true, now).with_tag("path", path.as_str()),
			);
		}

		let outcome = self.transport.send(request.clone()).await;
		let now = self.clock.now();
		let elapsed = headers::elapsed_since_start(&request, now).unwrap_or(Duration::ZERO);

		if outcome.is_ok() {
			obs::record_request_latency(elapsed, elapsed > SLOW_REQUEST_THRESHOLD);
		}

		match outcome {
			Ok(response) if response.is_success() => {
				if elapsed > SLOW_REQUEST_THRESHOLD {
					self.batcher.track_request(
						MetricEvent::request(
							request.method.as_str(),
							path.as_str(),
							Some(response.status),
							elapsed,
							now,
						)
						.with_tag("slow", "true"),
					);
				}

				Ok(response)
			},
			Ok(response) => Err(self.on_error_response(&request, &path, response, elapsed, now)),
			Err(failure) => Err(self.on_transport_failure(&request, &path, failure, elapsed, now)),
		}
	}

	fn reject(&self, request: &ApiRequest, path: &str, failure: LocalFailure) -> ApiError {
		let now = self.clock.now();
		let error = classify::classify(failure.into(), now);

		self.metrics.record_short_circuit();
		obs::record_op_outcome(OpKind::Request, OpOutcome::ShortCircuit);
		tracing::debug!(path, kind = %error.kind(), "Request rejected before dispatch.");
		self.batcher.track_request(
			failure_event(request.method, path, None, Duration::ZERO, now, &error)
				.with_tag("stage", "request"),
		);

		error
	}

	fn on_error_response(
		&self,
		request: &ApiRequest,
		path: &str,
		response: ApiResponse,
		elapsed: Duration,
		now: OffsetDateTime,
	) -> ApiError {
		let status = response.status;

		match status {
			401 if routes::requires_auth(path) => {
				self.session.invalidate(InvalidationReason::Unauthorized);
				self.metrics.record_session_expired();
				self.batcher.track_auth_event(
					MetricEvent::auth("session_expired", false, now).with_tag("path", path),
				);
			},
			403 => {
				let mut event =
					MetricEvent::auth("permission_denied", false, now).with_tag("resource", path);

				if let Some(permission) = response.header(REQUIRED_PERMISSION_HEADER) {
					event = event.with_tag("required_permission", permission);
				}

				self.batcher.track_auth_event(event);
			},
			429 => {
				self.batcher.track_request(
					MetricEvent::request(request.method.as_str(), path, Some(429), elapsed, now)
						.with_error("rate_limited")
						.with_tag("kind", ApiErrorKind::RateLimit.as_str()),
				);
			},
			_ => {},
		}

		let error = classify::classify(RawFailure::Response(response), now);

		self.report_failure(request.method, path, Some(status), elapsed, now, &error);

		error
	}

	fn on_transport_failure(
		&self,
		request: &ApiRequest,
		path: &str,
		failure: TransportFailure,
		elapsed: Duration,
		now: OffsetDateTime,
	) -> ApiError {
		tracing::warn!(path, error = %failure, "Request produced no response.");

		let error = classify::classify(RawFailure::Transport(failure), now);

		self.report_failure(request.method, path, None, elapsed, now, &error);

		error
	}

	fn report_failure(
		&self,
		method: Method,
		path: &str,
		status: Option<u16>,
		elapsed: Duration,
		now: OffsetDateTime,
		error: &ApiError,
	) {
		if matches!(error.kind(), ApiErrorKind::Auth | ApiErrorKind::RateLimit)
			|| routes::is_reporting_excluded(path)
		{
			return;
		}

		self.batcher.track_request(failure_event(method, path, status, elapsed, now, error));
	}
}
impl Debug for ApiClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("retry", &self.retry)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

fn failure_event(
	method: Method,
	path: &str,
	status: Option<u16>,
	elapsed: Duration,
	now: OffsetDateTime,
	error: &ApiError,
) -> MetricEvent {
	MetricEvent::request(method.as_str(), path, status, elapsed, now)
		.with_error(error.message())
		.with_tag("kind", error.kind().as_str())
}
