//! Hardening and correlation headers stamped on every outbound request.

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	http::{ApiRequest, Method},
	store::DeviceProfile,
};

/// Request-start marker the pipeline computes durations from (Unix milliseconds).
pub const REQUEST_START_HEADER: &str = "x-request-start";
/// Device fingerprint header.
pub const FINGERPRINT_HEADER: &str = "x-device-fingerprint";
/// Per-request correlation id header.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Request timestamp header (RFC 3339).
pub const REQUEST_TIMESTAMP_HEADER: &str = "x-request-timestamp";
/// CSRF token header for state-changing calls.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Server-advertised permission required by a rejected call.
pub const REQUIRED_PERMISSION_HEADER: &str = "x-required-permission";

const HARDENING: [(&str, &str); 4] = [
	("x-content-type-options", "nosniff"),
	("x-frame-options", "DENY"),
	("x-xss-protection", "1; mode=block"),
	("referrer-policy", "strict-origin-when-cross-origin"),
];

/// Supplies the CSRF token published by the host page, if any.
pub trait CsrfTokenSource
where
	Self: Send + Sync,
{
	/// Current CSRF token.
	fn csrf_token(&self) -> Option<String>;
}
impl<F> CsrfTokenSource for F
where
	F: Send + Sync + Fn() -> Option<String>,
{
	fn csrf_token(&self) -> Option<String> {
		self()
	}
}

/// Fixed CSRF token (or none).
#[derive(Clone, Debug, Default)]
pub struct StaticCsrfToken(pub Option<String>);
impl CsrfTokenSource for StaticCsrfToken {
	fn csrf_token(&self) -> Option<String> {
		self.0.clone()
	}
}

/// Stamps the hardening, fingerprint, correlation, and CSRF headers.
pub struct SecurityHeaders {
	fingerprint: String,
	csrf: Arc<dyn CsrfTokenSource>,
}
impl SecurityHeaders {
	/// Derives the fingerprint from `profile`; no CSRF source.
	pub fn new(profile: &DeviceProfile) -> Self {
		Self { fingerprint: profile.fingerprint(), csrf: Arc::new(StaticCsrfToken::default()) }
	}

	/// Installs the CSRF token source.
	pub fn with_csrf_source(mut self, csrf: Arc<dyn CsrfTokenSource>) -> Self {
		self.csrf = csrf;

		self
	}

	/// Applies every header to `request`.
	pub fn apply(&self, request: &mut ApiRequest, now: OffsetDateTime) {
		for (name, value) in HARDENING {
			request.set_header(name, value);
		}

		request.set_header(FINGERPRINT_HEADER, self.fingerprint.as_str());
		request.set_header(REQUEST_ID_HEADER, request_id());
		request.set_header(
			REQUEST_TIMESTAMP_HEADER,
			now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string()),
		);

		if needs_csrf(request.method)
			&& let Some(token) = self.csrf.csrf_token().filter(|token| !token.is_empty())
		{
			request.set_header(CSRF_HEADER, token);
		}
	}
}
impl Debug for SecurityHeaders {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecurityHeaders").finish_non_exhaustive()
	}
}

/// Fresh random request id (32 hex characters).
pub fn request_id() -> String {
	format!("{:032x}", rand::random::<u128>())
}

/// Writes the request-start marker.
pub fn stamp_start(request: &mut ApiRequest, now: OffsetDateTime) {
	let millis = now.unix_timestamp_nanos() / 1_000_000;

	request.set_header(REQUEST_START_HEADER, millis.to_string());
}

/// Milliseconds elapsed since the request-start marker, or `None` when it is missing.
pub fn elapsed_since_start(request: &ApiRequest, now: OffsetDateTime) -> Option<Duration> {
	let started: i128 = request.header(REQUEST_START_HEADER)?.parse().ok()?;
	let elapsed = now.unix_timestamp_nanos() / 1_000_000 - started;

	Some(Duration::milliseconds(i64::try_from(elapsed.max(0)).unwrap_or(i64::MAX)))
}

fn needs_csrf(method: Method) -> bool {
	!method.is_read_only()
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn headers() -> SecurityHeaders {
		SecurityHeaders::new(&DeviceProfile::new("agent", "en-US", "1x1x1", "https://app.test"))
			.with_csrf_source(Arc::new(|| Some("csrf-1".to_owned())))
	}

	#[test]
	fn every_request_gets_hardening_and_correlation_headers() {
		let mut request = ApiRequest::get("/words");

		headers().apply(&mut request, macros::datetime!(2025-01-01 00:00 UTC));

		assert_eq!(request.header("X-Frame-Options"), Some("DENY"));
		assert_eq!(request.header("X-Content-Type-Options"), Some("nosniff"));
		assert_eq!(request.header(REQUEST_ID_HEADER).map(str::len), Some(32));
		assert_eq!(request.header(REQUEST_TIMESTAMP_HEADER), Some("2025-01-01T00:00:00Z"));
		assert!(request.header(FINGERPRINT_HEADER).is_some());
		assert_eq!(request.header(CSRF_HEADER), None);
	}

	#[test]
	fn state_changing_requests_carry_csrf() {
		let mut request = ApiRequest::post("/words", serde_json::json!({ "word": "hello" }));

		headers().apply(&mut request, macros::datetime!(2025-01-01 00:00 UTC));

		assert_eq!(request.header(CSRF_HEADER), Some("csrf-1"));
	}

	#[test]
	fn request_ids_are_unique() {
		assert_ne!(request_id(), request_id());
	}

	#[test]
	fn start_marker_round_trips_to_elapsed() {
		let start = macros::datetime!(2025-01-01 00:00 UTC);
		let mut request = ApiRequest::get("/words");

		stamp_start(&mut request, start);

		assert_eq!(
			elapsed_since_start(&request, start + Duration::milliseconds(1_250)),
			Some(Duration::milliseconds(1_250))
		);
	}
}
