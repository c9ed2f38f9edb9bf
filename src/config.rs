//! Gateway configuration.
//!
//! Every section deserializes with defaults, so a document only needs the API base URL.
//! Durations are expressed in whole seconds or milliseconds, as the field names say.

// self
use crate::{
	_prelude::*,
	error::{ApiErrorKind, ConfigError},
	rate_limit::EndpointLimit,
};

/// Environment variable holding the identity-provider domain.
pub const IDENTITY_DOMAIN_ENV: &str = "IDENTITY_DOMAIN";
/// Environment variable holding the identity-provider client id.
pub const IDENTITY_CLIENT_ID_ENV: &str = "IDENTITY_CLIENT_ID";
/// Environment variable holding the API audience.
pub const IDENTITY_AUDIENCE_ENV: &str = "IDENTITY_AUDIENCE";

/// Top-level configuration consumed by [`crate::gateway::Gateway`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
	/// Versioned API root, e.g. `https://api.example.com/api/v1/`.
	pub api_base: Url,
	/// Key prefix used by the obfuscated store.
	#[serde(default = "default_namespace")]
	pub storage_namespace: String,
	/// Session timing.
	#[serde(default)]
	pub session: SessionConfig,
	/// Telemetry batching.
	#[serde(default)]
	pub batcher: BatcherConfig,
	/// Notification cool-downs.
	#[serde(default)]
	pub notify: NotifyConfig,
	/// Endpoint limits applied on top of the built-in auth policy.
	#[serde(default)]
	pub rate_limits: BTreeMap<String, EndpointLimit>,
	/// Identity-provider settings, when the host supplies them.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub identity: Option<IdentityConfig>,
}
impl GatewayConfig {
	/// Creates a configuration with default sections.
	pub fn new(api_base: Url) -> Result<Self, ConfigError> {
		Ok(Self {
			api_base: normalize_base(api_base)?,
			storage_namespace: default_namespace(),
			session: SessionConfig::default(),
			batcher: BatcherConfig::default(),
			notify: NotifyConfig::default(),
			rate_limits: BTreeMap::new(),
			identity: None,
		})
	}

	/// Parses `raw` as the API base URL.
	pub fn from_base_str(raw: &str) -> Result<Self, ConfigError> {
		let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBaseUrl { value: raw.into() })?;

		Self::new(url)
	}

	/// Parses a JSON document and normalizes the base URL.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let mut config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|e| ConfigError::InvalidDocument { message: e.to_string() })?;

		config.api_base = normalize_base(config.api_base)?;

		Ok(config)
	}

	/// Overrides the storage namespace.
	pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.storage_namespace = namespace.into();

		self
	}

	/// Overrides the session timing.
	pub fn with_session(mut self, session: SessionConfig) -> Self {
		self.session = session;

		self
	}

	/// Overrides the telemetry batching.
	pub fn with_batcher(mut self, batcher: BatcherConfig) -> Self {
		self.batcher = batcher;

		self
	}

	/// Overrides the notification cool-downs.
	pub fn with_notify(mut self, notify: NotifyConfig) -> Self {
		self.notify = notify;

		self
	}

	/// Adds (or replaces) an endpoint limit.
	pub fn with_rate_limit(mut self, endpoint: impl Into<String>, limit: EndpointLimit) -> Self {
		self.rate_limits.insert(endpoint.into(), limit);

		self
	}

	/// Attaches identity-provider settings.
	pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
		self.identity = Some(identity);

		self
	}
}

/// Session timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
	/// Remaining lifetime below which the token counts as due for refresh.
	pub refresh_buffer_secs: u64,
	/// Period of the refresh check.
	pub refresh_check_interval_secs: u64,
	/// Session timeout used when the token lifetime is unknown.
	pub timeout_fallback_secs: u64,
}
impl SessionConfig {
	/// Refresh buffer as a duration.
	pub fn refresh_buffer(&self) -> Duration {
		secs(self.refresh_buffer_secs)
	}

	/// Refresh check period as a duration.
	pub fn refresh_check_interval(&self) -> Duration {
		secs(self.refresh_check_interval_secs)
	}

	/// Timeout fallback as a duration.
	pub fn timeout_fallback(&self) -> Duration {
		secs(self.timeout_fallback_secs)
	}
}
impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			refresh_buffer_secs: 300,
			refresh_check_interval_secs: 60,
			timeout_fallback_secs: 3_600,
		}
	}
}

/// Telemetry batching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatcherConfig {
	/// Auth-queue flush period.
	pub auth_flush_interval_secs: u64,
	/// Auth-queue length that triggers an immediate flush.
	pub auth_batch_size: usize,
	/// Request-queue length that forces an immediate send.
	pub request_max_queue: usize,
	/// Window within which a repeated `METHOD url` pair is dropped.
	pub dedup_window_ms: u64,
	/// Minimum spacing between request-queue sends.
	pub min_send_interval_secs: u64,
	/// Paths never recorded.
	pub excluded_endpoints: Vec<String>,
}
impl BatcherConfig {
	/// Auth flush period as a duration.
	pub fn auth_flush_interval(&self) -> Duration {
		secs(self.auth_flush_interval_secs)
	}

	/// Dedup window as a duration.
	pub fn dedup_window(&self) -> Duration {
		Duration::milliseconds(i64::try_from(self.dedup_window_ms).unwrap_or(i64::MAX))
	}

	/// Minimum send spacing as a duration.
	pub fn min_send_interval(&self) -> Duration {
		secs(self.min_send_interval_secs)
	}
}
impl Default for BatcherConfig {
	fn default() -> Self {
		Self {
			auth_flush_interval_secs: 60,
			auth_batch_size: 10,
			request_max_queue: 50,
			dedup_window_ms: 2_000,
			min_send_interval_secs: 30,
			excluded_endpoints: vec!["/metrics/request".into(), "/health".into()],
		}
	}
}

/// Notification cool-downs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotifyConfig {
	/// Cool-down for kinds without an override.
	pub default_cooldown_secs: u64,
	/// Per-kind cool-downs.
	pub cooldown_overrides: BTreeMap<ApiErrorKind, u64>,
}
impl NotifyConfig {
	/// Cool-down applied to `kind`.
	pub fn cooldown_for(&self, kind: ApiErrorKind) -> Duration {
		secs(self.cooldown_overrides.get(&kind).copied().unwrap_or(self.default_cooldown_secs))
	}
}
impl Default for NotifyConfig {
	fn default() -> Self {
		Self {
			default_cooldown_secs: 30,
			cooldown_overrides: BTreeMap::from([(ApiErrorKind::Auth, 300)]),
		}
	}
}

/// Identity-provider settings, treated as opaque values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
	/// Provider domain.
	pub domain: String,
	/// Client id.
	pub client_id: String,
	/// API audience.
	pub audience: String,
}
impl IdentityConfig {
	/// Reads the settings from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads the settings through `lookup`; only presence is checked.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let required = |name: &'static str| {
			lookup(name)
				.map(|value| value.trim().to_owned())
				.filter(|value| !value.is_empty())
				.ok_or(ConfigError::MissingSetting { name })
		};

		Ok(Self {
			domain: required(IDENTITY_DOMAIN_ENV)?,
			client_id: required(IDENTITY_CLIENT_ID_ENV)?,
			audience: required(IDENTITY_AUDIENCE_ENV)?,
		})
	}
}

fn default_namespace() -> String {
	"secure_".into()
}

fn secs(value: u64) -> Duration {
	Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

fn normalize_base(mut url: Url) -> Result<Url, ConfigError> {
	if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
		return Err(ConfigError::InvalidBaseUrl { value: url.into() });
	}
	if !url.path().ends_with('/') {
		let path = format!("{}/", url.path());

		url.set_path(&path);
	}

	Ok(url)
}
