//! Path classification used by the pipeline and the batcher.

/// Metrics ingest path.
pub const METRICS_INGEST_PATH: &str = "/metrics/request";
/// Health-check path.
pub const HEALTH_PATH: &str = "/health";
/// Server-side token validation path.
pub const VALIDATE_PATH: &str = "/auth/validate";
/// Auth status probe.
pub const STATUS_PATH: &str = "/auth/status";

const AUTH_PREFIX: &str = "/auth/";
const PUBLIC_PREFIX: &str = "/public/";
const PUBLIC_PATHS: [&str; 5] =
	["/auth/login", "/auth/signup", STATUS_PATH, HEALTH_PATH, METRICS_INGEST_PATH];

/// Strips query and fragment, and ensures a leading `/`.
pub fn normalize(path: &str) -> String {
	let end = path.find(['?', '#']).unwrap_or(path.len());
	let bare = path[..end].trim_end_matches('/');

	if bare.starts_with('/') { bare.to_owned() } else { format!("/{bare}") }
}

/// Returns `true` unless the path is on the public allow-list.
pub fn requires_auth(path: &str) -> bool {
	let path = normalize(path);

	!(PUBLIC_PATHS.contains(&path.as_str()) || path.starts_with(PUBLIC_PREFIX))
}

/// Authentication-family endpoints that consult the rate limiter (validate and status excluded).
pub fn is_auth_family(path: &str) -> bool {
	let path = normalize(path);

	path.starts_with(AUTH_PREFIX) && path != VALIDATE_PATH && path != STATUS_PATH
}

/// Paths whose traffic is never reported to telemetry.
pub fn is_reporting_excluded(path: &str) -> bool {
	let path = normalize(path);

	path == METRICS_INGEST_PATH || path == HEALTH_PATH || path.starts_with("/health/")
}
