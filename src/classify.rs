//! Maps every raw failure shape onto the closed [`ApiErrorKind`] taxonomy.
//!
//! Classification is total and deterministic: each [`RawFailure`] yields exactly one kind, and
//! the raw value is attached to the resulting [`ApiError`] for diagnostics only.

// self
use crate::{
	_prelude::*,
	error::{ApiError, ApiErrorKind, ApiStatus},
	http::{ApiResponse, TransportFailure},
};

/// Wait reported for 429 responses without a usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::seconds(60);

/// Failure as observed before classification.
#[derive(Clone, Debug, PartialEq)]
pub enum RawFailure {
	/// Rejected locally, before any network call.
	Local(LocalFailure),
	/// The server answered with a non-success status.
	Response(ApiResponse),
	/// No response was received.
	Transport(TransportFailure),
}
impl From<ApiResponse> for RawFailure {
	fn from(response: ApiResponse) -> Self {
		Self::Response(response)
	}
}
impl From<TransportFailure> for RawFailure {
	fn from(failure: TransportFailure) -> Self {
		Self::Transport(failure)
	}
}
impl From<LocalFailure> for RawFailure {
	fn from(failure: LocalFailure) -> Self {
		Self::Local(failure)
	}
}

/// Local rejection markers set by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalFailure {
	/// The client-side rate limiter refused the call.
	RateLimited {
		/// Time until the next token.
		wait: Duration,
	},
	/// The path requires a session and none is stored.
	MissingToken,
	/// Explicit auth marker (e.g. a session invalidated mid-flight).
	Unauthorized {
		/// Description for diagnostics.
		message: String,
	},
}

/// Classifies `raw` into an [`ApiError`]. First match wins:
///
/// 1. rate-limit marker or 429 → `rate_limit`
/// 2. auth marker, missing token, or 401 → `auth`
/// 3. response → `server` (5xx), `validation` (400), `permission` (403), else `unknown`
/// 4. aborted connection → `timeout`
/// 5. anything else without a response → `network`
///
/// The pipeline reports a 403 as a permission event and then hands it on to this classifier,
/// so it gets the taxonomy's `permission` kind rather than falling through to `unknown`.
pub fn classify(raw: RawFailure, now: OffsetDateTime) -> ApiError {
	let error = match &raw {
		RawFailure::Local(LocalFailure::RateLimited { wait }) =>
			rate_limited(ApiStatus::Symbolic("RATE_LIMITED"), *wait),
		RawFailure::Response(response) if response.status == 429 => rate_limited(
			ApiStatus::Code(429),
			response.retry_after(now).unwrap_or(DEFAULT_RETRY_AFTER),
		),
		RawFailure::Local(LocalFailure::MissingToken) => ApiError::new(
			ApiErrorKind::Auth,
			ApiStatus::Symbolic("NO_TOKEN"),
			"No authentication token available.",
		),
		RawFailure::Local(LocalFailure::Unauthorized { message }) =>
			ApiError::new(ApiErrorKind::Auth, ApiStatus::Symbolic("UNAUTHORIZED"), message.clone()),
		RawFailure::Response(response) if response.status == 401 => with_server_details(
			ApiErrorKind::Auth,
			response,
			"Your session has expired. Please sign in again.",
		),
		RawFailure::Response(response) => {
			let (kind, fallback) = match response.status {
				500.. => (ApiErrorKind::Server, "Server error. Please try again later."),
				400 => (ApiErrorKind::Validation, "The request was rejected as invalid."),
				403 => (ApiErrorKind::Permission, "You do not have permission to do that."),
				_ => (ApiErrorKind::Unknown, "Unexpected response from the server."),
			};

			with_server_details(kind, response, fallback)
		},
		RawFailure::Transport(failure) if failure.is_aborted() => ApiError::new(
			ApiErrorKind::Timeout,
			ApiStatus::Symbolic("TIMEOUT"),
			"The request timed out.",
		),
		RawFailure::Transport(_) => ApiError::new(
			ApiErrorKind::Network,
			ApiStatus::Symbolic("NETWORK_ERROR"),
			"Network error. Check your connection.",
		),
	};

	error.with_raw(raw)
}

/// Extracts the server-provided message (`message` or `error` field) from a JSON body.
pub fn server_message(response: &ApiResponse) -> Option<String> {
	let body = response.json()?;

	["message", "error"]
		.iter()
		.find_map(|field| body.get(field).and_then(|value| value.as_str()))
		.filter(|message| !message.trim().is_empty())
		.map(str::to_owned)
}

fn rate_limited(status: ApiStatus, wait: Duration) -> ApiError {
	let secs = (wait.whole_milliseconds() + 999) / 1_000;

	ApiError::new(
		ApiErrorKind::RateLimit,
		status,
		format!("Too many requests. Please wait {secs} seconds before trying again."),
	)
	.with_retry_after(wait)
}

fn with_server_details(kind: ApiErrorKind, response: &ApiResponse, fallback: &str) -> ApiError {
	let message = server_message(response).unwrap_or_else(|| fallback.to_owned());
	let error = ApiError::new(kind, ApiStatus::Code(response.status), message);

	match response.json() {
		Some(details) => error.with_details(details),
		None if !response.body.trim().is_empty() =>
			error.with_details(serde_json::Value::String(response.body.clone())),
		None => error,
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const NOW: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	fn kind_of(raw: impl Into<RawFailure>) -> ApiErrorKind {
		classify(raw.into(), NOW).kind()
	}

	#[test]
	fn every_shape_maps_to_one_kind() {
		let cases = [
			(RawFailure::from(ApiResponse::new(401, "")), ApiErrorKind::Auth),
			(ApiResponse::new(403, "").into(), ApiErrorKind::Permission),
			(ApiResponse::new(429, "").into(), ApiErrorKind::RateLimit),
			(ApiResponse::new(400, "").into(), ApiErrorKind::Validation),
			(ApiResponse::new(500, "").into(), ApiErrorKind::Server),
			(ApiResponse::new(503, "").into(), ApiErrorKind::Server),
			(ApiResponse::new(404, "").into(), ApiErrorKind::Unknown),
			(TransportFailure::aborted("timed out").into(), ApiErrorKind::Timeout),
			(TransportFailure::network("refused").into(), ApiErrorKind::Network),
			(LocalFailure::MissingToken.into(), ApiErrorKind::Auth),
			(
				LocalFailure::RateLimited { wait: Duration::seconds(3) }.into(),
				ApiErrorKind::RateLimit,
			),
		];

		for (raw, expected) in cases {
			assert_eq!(kind_of(raw.clone()), expected, "{raw:?}");
			assert_eq!(kind_of(raw.clone()), kind_of(raw));
		}
	}

	#[test]
	fn rate_limit_message_uses_retry_after_or_default() {
		let with_header = classify(
			ApiResponse::new(429, "").with_header("Retry-After", "12").into(),
			NOW,
		);
		let without_header = classify(ApiResponse::new(429, "").into(), NOW);

		assert_eq!(with_header.retry_after(), Some(Duration::seconds(12)));
		assert!(with_header.message().contains("12 seconds"));
		assert_eq!(without_header.retry_after(), Some(DEFAULT_RETRY_AFTER));
		assert!(without_header.message().contains("60 seconds"));
	}

	#[test]
	fn server_message_and_body_become_details() {
		let error = classify(
			ApiResponse::new(400, r#"{"message":"word is required","field":"word"}"#).into(),
			NOW,
		);

		assert_eq!(error.message(), "word is required");
		assert_eq!(error.status(), &ApiStatus::Code(400));
		assert_eq!(
			error.details().and_then(|details| details.get("field")),
			Some(&serde_json::json!("word"))
		);

		let plain = classify(ApiResponse::new(502, "bad gateway").into(), NOW);

		assert_eq!(plain.message(), "Server error. Please try again later.");
		assert_eq!(plain.details(), Some(&serde_json::json!("bad gateway")));
	}

	#[test]
	fn raw_failure_is_kept_for_diagnostics() {
		let error = classify(TransportFailure::network("connection reset").into(), NOW);

		assert!(matches!(
			error.raw(),
			Some(RawFailure::Transport(failure)) if failure.message == "connection reset"
		));
		assert_eq!(error.status(), &ApiStatus::Symbolic("NETWORK_ERROR"));
	}
}
