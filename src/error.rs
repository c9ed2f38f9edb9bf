//! Crate-level error types shared by the session store, transport pipeline, and configuration.

// self
use crate::{_prelude::*, classify::RawFailure};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs that can fail outside the HTTP boundary.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Normalized HTTP-boundary failure.
	#[error(transparent)]
	Api(#[from] ApiError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// API base URL cannot be parsed or cannot carry relative paths.
	#[error("API base URL `{value}` is invalid.")]
	InvalidBaseUrl {
		/// Offending raw value.
		value: String,
	},
	/// Configuration document cannot be decoded.
	#[error("Configuration document is invalid: {message}")]
	InvalidDocument {
		/// Decoder message, including the failing path.
		message: String,
	},
	/// A required setting is absent or empty.
	#[error("Required setting `{name}` is missing.")]
	MissingSetting {
		/// Setting (environment variable) name.
		name: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Closed failure taxonomy every HTTP-boundary error is normalized into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
	/// Missing, expired, or rejected credentials.
	Auth,
	/// Authenticated but not allowed (HTTP 403).
	Permission,
	/// Throttled locally or by the server (HTTP 429).
	RateLimit,
	/// Server-side failure (HTTP 5xx).
	Server,
	/// Request rejected as malformed (HTTP 400).
	Validation,
	/// Connection aborted before a response arrived.
	Timeout,
	/// No response received.
	Network,
	/// Anything else.
	Unknown,
}
impl ApiErrorKind {
	/// Every kind, in declaration order.
	pub const ALL: [Self; 8] = [
		Self::Auth,
		Self::Permission,
		Self::RateLimit,
		Self::Server,
		Self::Validation,
		Self::Timeout,
		Self::Network,
		Self::Unknown,
	];

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Auth => "auth",
			Self::Permission => "permission",
			Self::RateLimit => "rate_limit",
			Self::Server => "server",
			Self::Validation => "validation",
			Self::Timeout => "timeout",
			Self::Network => "network",
			Self::Unknown => "unknown",
		}
	}
}
impl Display for ApiErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Status attached to an [`ApiError`]: an HTTP code or a symbolic label for local failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiStatus {
	/// HTTP status code returned by the server.
	Code(u16),
	/// Symbolic status for failures without a response (`NO_TOKEN`, `NETWORK_ERROR`, ...).
	Symbolic(&'static str),
}
impl ApiStatus {
	/// Returns the numeric code when one exists.
	pub fn code(&self) -> Option<u16> {
		match self {
			Self::Code(code) => Some(*code),
			Self::Symbolic(_) => None,
		}
	}
}
impl Display for ApiStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Code(code) => write!(f, "{code}"),
			Self::Symbolic(label) => f.write_str(label),
		}
	}
}

/// Normalized failure produced once per failed call and never mutated afterward.
///
/// Callers branch on [`ApiError::kind`] only; the raw failure is kept for diagnostics.
#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct ApiError {
	kind: ApiErrorKind,
	status: ApiStatus,
	message: String,
	details: Option<serde_json::Value>,
	retry_after: Option<Duration>,
	raw: Option<Arc<RawFailure>>,
}
impl ApiError {
	/// Creates a new error without details or a raw failure.
	pub fn new(kind: ApiErrorKind, status: ApiStatus, message: impl Into<String>) -> Self {
		Self { kind, status, message: message.into(), details: None, retry_after: None, raw: None }
	}

	/// Attaches structured details (typically the server's JSON body).
	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.details = Some(details);

		self
	}

	/// Attaches the wait the caller should observe before trying again.
	pub fn with_retry_after(mut self, wait: Duration) -> Self {
		self.retry_after = Some(wait);

		self
	}

	/// Attaches the raw failure this error was classified from.
	pub fn with_raw(mut self, raw: RawFailure) -> Self {
		self.raw = Some(Arc::new(raw));

		self
	}

	/// Taxonomy tag.
	pub fn kind(&self) -> ApiErrorKind {
		self.kind
	}

	/// Numeric or symbolic status.
	pub fn status(&self) -> &ApiStatus {
		&self.status
	}

	/// Human-readable message.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Structured details, when the server supplied any.
	pub fn details(&self) -> Option<&serde_json::Value> {
		self.details.as_ref()
	}

	/// Wait hint for rate-limit failures.
	pub fn retry_after(&self) -> Option<Duration> {
		self.retry_after
	}

	/// Raw failure kept for diagnostics only.
	pub fn raw(&self) -> Option<&RawFailure> {
		self.raw.as_deref()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "disk unavailable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn api_error_displays_message_and_keeps_kind() {
		let error = ApiError::new(ApiErrorKind::Validation, ApiStatus::Code(400), "Bad word.")
			.with_details(serde_json::json!({ "field": "word" }));

		assert_eq!(error.to_string(), "Bad word.");
		assert_eq!(error.kind(), ApiErrorKind::Validation);
		assert_eq!(error.status().code(), Some(400));
		assert_eq!(error.details().and_then(|d| d["field"].as_str()), Some("word"));
	}

	#[test]
	fn kind_labels_are_stable() {
		let labels: Vec<_> = ApiErrorKind::ALL.iter().map(|kind| kind.as_str()).collect();

		assert_eq!(
			labels,
			[
				"auth",
				"permission",
				"rate_limit",
				"server",
				"validation",
				"timeout",
				"network",
				"unknown"
			]
		);
		assert_eq!(
			serde_json::to_string(&ApiErrorKind::RateLimit)
				.expect("Error kind should serialize to JSON."),
			"\"rate_limit\""
		);
	}
}
