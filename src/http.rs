//! Transport primitives and the interceptor pipeline.
//!
//! [`ApiTransport`] is the crate's only dependency on an HTTP stack. It speaks crate-owned
//! [`ApiRequest`]/[`ApiResponse`] values and reports calls that never produced a response as a
//! [`TransportFailure`]. Everything above it (header stamping, auth attachment, throttling,
//! classification, telemetry) lives in [`ApiClient`].

pub mod headers;
pub mod metrics;
pub mod pipeline;
pub mod routes;

pub use headers::*;
pub use metrics::*;
pub use pipeline::*;

// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// Boxed future returned by [`ApiTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportFailure>> + 'a + Send>>;

/// HTTP stack abstraction used by [`ApiClient`].
///
/// Implementations resolve [`ApiRequest::path`] against their own base URL. Any HTTP status,
/// including 4xx/5xx, is a successful transport outcome; only calls that produced no response
/// at all fail with [`TransportFailure`].
pub trait ApiTransport
where
	Self: Send + Sync,
{
	/// Dispatches `request`.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// HTTP method subset used by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`.
	Get,
	/// `HEAD`.
	Head,
	/// `POST`.
	Post,
	/// `PUT`.
	Put,
	/// `PATCH`.
	Patch,
	/// `DELETE`.
	Delete,
}
impl Method {
	/// Canonical upper-case name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}

	/// Returns `true` for `GET` and `HEAD`, which never carry a CSRF token.
	pub const fn is_read_only(self) -> bool {
		matches!(self, Method::Get | Method::Head)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outbound request. Header names are stored lower-cased.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the API root, e.g. `/auth/validate`.
	pub path: String,
	/// Request headers.
	pub headers: BTreeMap<String, String>,
	/// JSON body.
	pub body: Option<serde_json::Value>,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), headers: BTreeMap::new(), body: None }
	}

	/// Shorthand for a `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// Shorthand for a `POST` request with a JSON body.
	pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
		Self::new(Method::Post, path).with_body(body)
	}

	/// Sets a header, replacing any previous value.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.set_header(name, value);

		self
	}

	/// Attaches a JSON body.
	pub fn with_body(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Sets a header in place.
	pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
		self.headers.insert(name.to_ascii_lowercase(), value.into());
	}

	/// Reads a header (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}
}

/// Response received from the server. Header names are stored lower-cased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers.
	pub headers: BTreeMap<String, String>,
	/// Raw body text.
	pub body: String,
}
impl ApiResponse {
	/// Creates a response without headers.
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self { status, headers: BTreeMap::new(), body: body.into() }
	}

	/// Sets a header.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Reads a header (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Parses the body as JSON, returning `None` for empty or non-JSON bodies.
	pub fn json(&self) -> Option<serde_json::Value> {
		serde_json::from_str(&self.body).ok()
	}

	/// `Retry-After` hint relative to `now`.
	pub fn retry_after(&self, now: OffsetDateTime) -> Option<Duration> {
		parse_retry_after(self.header("retry-after")?, now)
	}
}

/// Why a call produced no response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportFailureKind {
	/// The connection was aborted (client-side timeout).
	Aborted,
	/// Anything else: DNS, refused connection, TLS, reset.
	Network,
}

/// Call that never produced an HTTP response.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct TransportFailure {
	/// Failure class.
	pub kind: TransportFailureKind,
	/// Transport-provided description.
	pub message: String,
}
impl TransportFailure {
	/// Builds a [`TransportFailureKind::Network`] failure.
	pub fn network(message: impl Into<String>) -> Self {
		Self { kind: TransportFailureKind::Network, message: message.into() }
	}

	/// Builds a [`TransportFailureKind::Aborted`] failure.
	pub fn aborted(message: impl Into<String>) -> Self {
		Self { kind: TransportFailureKind::Aborted, message: message.into() }
	}

	/// Returns `true` when the connection was aborted.
	pub fn is_aborted(&self) -> bool {
		self.kind == TransportFailureKind::Aborted
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportFailure {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::aborted(e.to_string()) } else { Self::network(e.to_string()) }
	}
}

/// [`ApiTransport`] backed by [`ReqwestClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	base: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

	/// Builds a transport with a 30 second request timeout.
	pub fn new(base: Url) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().timeout(Self::DEFAULT_TIMEOUT).build()?;

		Self::with_client(client, base)
	}

	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient, base: Url) -> Result<Self, ConfigError> {
		if base.cannot_be_a_base() {
			return Err(ConfigError::InvalidBaseUrl { value: base.into() });
		}

		Ok(Self { client, base })
	}

	/// API root requests are resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base
	}

	/// Resolves an API path against the base, keeping the base's path prefix.
	pub fn resolve(&self, path: &str) -> Result<Url, TransportFailure> {
		self.base
			.join(path.trim_start_matches('/'))
			.map_err(|e| TransportFailure::network(format!("Invalid request path `{path}`: {e}.")))
	}
}
#[cfg(feature = "reqwest")]
impl ApiTransport for ReqwestTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let url = self.resolve(&request.path)?;
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Head => reqwest::Method::HEAD,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Patch => reqwest::Method::PATCH,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder = self.client.request(method, url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = &request.body {
				builder = builder.json(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
				})
				.collect();
			let body = response.text().await?;

			Ok(ApiResponse { status, headers, body })
		})
	}
}

/// Parses a `Retry-After` value given as delta seconds or an HTTP date.
pub fn parse_retry_after(raw: &str, now: OffsetDateTime) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(secs.into()));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(parse_retry_after(" 42 ", now), Some(Duration::seconds(42)));
		assert_eq!(
			parse_retry_after("Wed, 01 Jan 2025 00:01:30 +0000", now),
			Some(Duration::seconds(90))
		);
		assert_eq!(parse_retry_after("Tue, 31 Dec 2024 23:00:00 +0000", now), None);
		assert_eq!(parse_retry_after("soon", now), None);
	}

	#[test]
	fn headers_are_case_insensitive() {
		let request = ApiRequest::get("/words").with_header("X-Request-ID", "abc");
		let response = ApiResponse::new(429, "").with_header("Retry-After", "7");

		assert_eq!(request.header("x-request-id"), Some("abc"));
		assert_eq!(
			response.retry_after(macros::datetime!(2025-01-01 00:00 UTC)),
			Some(Duration::seconds(7))
		);
		assert!(!response.is_success());
	}

	#[test]
	fn read_only_methods_are_get_and_head() {
		assert!(Method::Get.is_read_only());
		assert!(Method::Head.is_read_only());
		assert!(!Method::Delete.is_read_only());
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn resolve_keeps_versioned_prefix() {
		let transport = ReqwestTransport::new(
			Url::parse("https://api.test/api/v1/").expect("Fixture URL should parse."),
		)
		.expect("Transport should build.");

		assert_eq!(
			transport.resolve("/auth/validate").expect("Path should resolve.").as_str(),
			"https://api.test/api/v1/auth/validate"
		);
	}
}
