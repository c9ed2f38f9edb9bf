//! One-stop facade wiring the store, session, limiter, pipeline, validator, timers, and
//! telemetry from a single [`GatewayConfig`].
//!
//! The gateway owns every timer. Logging out (or any other session invalidation) stops the
//! refresh interval and the session timeout; logging out additionally resets every rate bucket
//! and empties both metric queues.

// self
use crate::{
	_prelude::*,
	auth::{
		BearerToken, InvalidationHandlerId, InvalidationReason, SessionStore, SessionSupervisor,
		TokenSource, TokenSourceError, TokenSourceFuture, TokenValidator, ValidationError,
	},
	clock::{Clock, SystemClock},
	config::GatewayConfig,
	error::ApiError,
	http::{ApiClient, ApiRequest, ApiResponse, ApiTransport, CsrfTokenSource, SecurityHeaders},
	notify::{NotificationGate, Notifier, TracingNotifier},
	rate_limit::RateLimiter,
	store::{DeviceProfile, MemoryBackend, ObfuscatedStore, StorageBackend, StorageBroadcast},
	telemetry::{HttpMetricsSink, MetricEvent, MetricsBatcher, Visibility},
};
#[cfg(feature = "reqwest")] use crate::{error::ConfigError, http::ReqwestTransport};

/// Host-side collaborators the gateway runs against.
#[derive(Clone)]
pub struct HostEnvironment {
	/// Persistent storage.
	pub backend: Arc<dyn StorageBackend>,
	/// Signals the storage key material is derived from.
	pub profile: DeviceProfile,
	/// Cross-tab change bus shared with the other tabs' stores.
	pub broadcast: StorageBroadcast,
	/// Wall-clock source.
	pub clock: Arc<dyn Clock>,
	/// Presents user-visible notices.
	pub notifier: Arc<dyn Notifier>,
	/// Identity-provider collaborator used by refresh and validation retries.
	pub token_source: Arc<dyn TokenSource>,
	/// CSRF token published by the host page.
	pub csrf: Option<Arc<dyn CsrfTokenSource>>,
}
impl HostEnvironment {
	/// Replaces the storage backend.
	pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
		self.backend = backend;

		self
	}

	/// Replaces the device profile.
	pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
		self.profile = profile;

		self
	}

	/// Joins an existing cross-tab bus.
	pub fn with_broadcast(mut self, broadcast: StorageBroadcast) -> Self {
		self.broadcast = broadcast;

		self
	}

	/// Replaces the clock.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Replaces the notifier.
	pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
		self.notifier = notifier;

		self
	}

	/// Installs the identity-provider collaborator.
	pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
		self.token_source = source;

		self
	}

	/// Installs the CSRF token source.
	pub fn with_csrf(mut self, csrf: Arc<dyn CsrfTokenSource>) -> Self {
		self.csrf = Some(csrf);

		self
	}
}
impl Default for HostEnvironment {
	fn default() -> Self {
		Self {
			backend: Arc::new(MemoryBackend::default()),
			profile: DeviceProfile::default(),
			broadcast: StorageBroadcast::default(),
			clock: Arc::new(SystemClock::new()),
			notifier: Arc::new(TracingNotifier),
			token_source: Arc::new(InteractiveLoginOnly),
			csrf: None,
		}
	}
}
impl Debug for HostEnvironment {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HostEnvironment")
			.field("profile", &self.profile)
			.field("broadcast", &self.broadcast)
			.field("csrf", &self.csrf.is_some())
			.finish_non_exhaustive()
	}
}

/// Session and API-resilience facade.
pub struct Gateway {
	config: GatewayConfig,
	session: Arc<SessionStore>,
	limiter: Arc<RateLimiter>,
	batcher: MetricsBatcher,
	client: Arc<ApiClient>,
	validator: TokenValidator,
	supervisor: SessionSupervisor,
	notices: Arc<NotificationGate>,
	invalidation_hook: InvalidationHandlerId,
}
impl Gateway {
	/// Builds a gateway over a caller-provided transport.
	pub fn with_transport(
		config: GatewayConfig,
		transport: Arc<dyn ApiTransport>,
		host: HostEnvironment,
	) -> Self {
		let HostEnvironment { backend, profile, broadcast, clock, notifier, token_source, csrf } =
			host;
		let store = Arc::new(
			ObfuscatedStore::new(backend, profile, broadcast)
				.with_namespace(config.storage_namespace.as_str()),
		);
		let refresh_buffer = config.session.refresh_buffer();
		let session =
			SessionStore::with_refresh_buffer(store.clone(), clock.clone(), refresh_buffer);
		let limiter = Arc::new(RateLimiter::with_default_policy(clock.clone()));

		for (endpoint, limit) in &config.rate_limits {
			limiter.configure_endpoint(endpoint.as_str(), *limit);
		}

		let mut ingest_headers = SecurityHeaders::new(store.profile());

		if let Some(csrf) = &csrf {
			ingest_headers = ingest_headers.with_csrf_source(csrf.clone());
		}

		let sink = Arc::new(HttpMetricsSink::new(transport.clone(), ingest_headers, clock.clone()));
		let batcher = MetricsBatcher::new(config.batcher.clone(), sink, clock.clone());
		let notices = Arc::new(NotificationGate::new(notifier, config.notify.clone(), clock));
		let mut client =
			ApiClient::new(transport, session.clone(), limiter.clone(), batcher.clone())
				.with_notifications(notices.clone());

		if let Some(csrf) = csrf {
			client = client.with_csrf_source(csrf);
		}

		let client = Arc::new(client);
		let validator = TokenValidator::new(client.clone())
			.with_token_source(token_source.clone())
			.with_notifications(notices.clone());
		let supervisor = SessionSupervisor::new(session.clone(), token_source, config.session)
			.with_batcher(batcher.clone());
		let invalidation_hook = {
			let supervisor = supervisor.clone();
			let batcher = batcher.clone();

			session.on_session_invalidated(move |reason| {
				tracing::debug!(reason = reason.as_str(), "Stopping session timers.");
				supervisor.shutdown();
				batcher.set_user_id(None);
			})
		};

		Self {
			config,
			session,
			limiter,
			batcher,
			client,
			validator,
			supervisor,
			notices,
			invalidation_hook,
		}
	}

	/// Builds a gateway over the default reqwest transport rooted at `config.api_base`.
	#[cfg(feature = "reqwest")]
	pub fn new(config: GatewayConfig, host: HostEnvironment) -> Result<Self, ConfigError> {
		let transport = ReqwestTransport::new(config.api_base.clone())?;

		Ok(Self::with_transport(config, Arc::new(transport), host))
	}

	/// Starts the telemetry flush timer, and the session timers when a session is stored.
	pub fn start(&self) {
		self.batcher.start();

		if self.session.get_token().is_some() {
			self.supervisor.start();
		}
	}

	/// Stores a token handed over by the login flow and arms the session timers.
	///
	/// Returns `false` (and leaves the session untouched) when no expiry can be determined.
	pub fn login(&self, token: impl Into<BearerToken>, expires_at: Option<OffsetDateTime>) -> bool {
		if !self.session.set_token(token, expires_at) {
			return false;
		}

		let user_id = self.session.user_id();

		self.batcher.set_user_id(user_id);
		self.batcher.track_auth_event(MetricEvent::auth("login", true, self.now()));
		self.batcher.start();
		self.supervisor.start();

		true
	}

	/// Ends the session: clears the token, every rate bucket, both metric queues, and every
	/// timer.
	pub fn logout(&self) {
		self.session.invalidate(InvalidationReason::Logout);
		self.supervisor.shutdown();
		self.limiter.reset_all();
		self.batcher.clear_cache();
		self.batcher.set_user_id(None);
		self.notices.reset();
		self.validator.reset();
	}

	/// Confirms the session with the backend; see [`TokenValidator::validate`].
	///
	/// A 401 during the pass invalidates the session and stops the timers; when a retry then
	/// succeeds with a renewed token, the timers are armed again.
	pub async fn validate_session(&self) -> Result<String, ValidationError> {
		let user_id = self.validator.validate().await?;

		if !self.supervisor.is_running() {
			tracing::debug!("Re-arming session timers after validation recovered.");
			self.supervisor.start();
		}

		self.batcher.set_user_id(Some(user_id.clone()));

		Ok(user_id)
	}

	/// Asks the identity provider for a fresh token now.
	pub async fn refresh_session(&self) -> Result<bool, TokenSourceError> {
		self.supervisor.refresh_now().await
	}

	/// Runs `request` through the pipeline once.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
		self.client.send(request).await
	}

	/// Runs `request` through the pipeline with the generic retry policy.
	pub async fn send_with_retry(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
		self.client.send_with_retry(request).await
	}

	/// Sends `GET path` once.
	pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
		self.client.get(path).await
	}

	/// Forwards a page visibility change to the telemetry batcher.
	pub fn set_visibility(&self, visibility: Visibility) {
		self.batcher.set_visibility(visibility);
	}

	/// Page teardown: hands queued request events to the beacon path and stops every timer.
	///
	/// Returns whether a beacon batch was handed off.
	pub fn teardown(&self) -> bool {
		let sent = self.batcher.flush_on_unload();

		self.batcher.shutdown();
		self.supervisor.shutdown();

		sent
	}

	/// Configuration the gateway was built from.
	pub fn config(&self) -> &GatewayConfig {
		&self.config
	}

	/// Session store.
	pub fn session(&self) -> &Arc<SessionStore> {
		&self.session
	}

	/// Rate limiter.
	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// Telemetry batcher.
	pub fn batcher(&self) -> &MetricsBatcher {
		&self.batcher
	}

	/// Pipeline client.
	pub fn client(&self) -> &Arc<ApiClient> {
		&self.client
	}

	/// Token validator.
	pub fn validator(&self) -> &TokenValidator {
		&self.validator
	}

	/// Session timers.
	pub fn supervisor(&self) -> &SessionSupervisor {
		&self.supervisor
	}

	/// Notification gate.
	pub fn notices(&self) -> &Arc<NotificationGate> {
		&self.notices
	}

	fn now(&self) -> OffsetDateTime {
		self.session.clock().now()
	}
}
impl Drop for Gateway {
	fn drop(&mut self) {
		self.session.remove_invalidation_handler(self.invalidation_hook);
		self.supervisor.shutdown();
		self.batcher.shutdown();
	}
}
impl Debug for Gateway {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gateway")
			.field("api_base", &self.config.api_base.as_str())
			.field("session", &self.session)
			.field("validator", &self.validator)
			.field("supervisor", &self.supervisor)
			.finish_non_exhaustive()
	}
}

/// Token source for hosts without silent renewal: every request needs the interactive login.
#[derive(Clone, Copy, Debug, Default)]
pub struct InteractiveLoginOnly;
impl TokenSource for InteractiveLoginOnly {
	fn fetch_token(&self) -> TokenSourceFuture<'_> {
		Box::pin(async { Err(TokenSourceError::LoginRequired) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{self, ScriptedTransport},
		config::GatewayConfig,
		rate_limit::EndpointLimit,
	};

	fn gateway(transport: &ScriptedTransport) -> (Arc<crate::clock::ManualClock>, Gateway) {
		let clock = _preludet::test_clock();
		let config = GatewayConfig::from_base_str(_preludet::TEST_API_BASE)
			.expect("Fixture base URL should be valid.")
			.with_storage_namespace("vocab_")
			.with_rate_limit("/words", EndpointLimit::new(2, 60_000, 0));
		let host = HostEnvironment::default()
			.with_profile(_preludet::test_device_profile())
			.with_clock(clock.clone());

		(clock, Gateway::with_transport(config, Arc::new(transport.clone()), host))
	}

	#[tokio::test]
	async fn login_arms_timers_and_logout_clears_everything() {
		let transport = ScriptedTransport::default();
		let (clock, gateway) = gateway(&transport);
		let token = _preludet::token_expiring_in(&*clock, "user-7", Duration::hours(1));

		assert!(gateway.login(token, None));
		assert!(gateway.supervisor().is_running());
		assert_eq!(gateway.batcher().pending_auth_count(), 1);

		gateway.limiter().wait_for_token("/auth/login", None).await;
		gateway.logout();

		assert!(!gateway.session().has_token());
		assert!(!gateway.supervisor().is_running());
		assert_eq!(gateway.batcher().pending_auth_count(), 0);
		assert_eq!(gateway.limiter().available_tokens("/auth/login", None), Some(5));
	}

	#[tokio::test]
	async fn configured_limits_extend_the_default_policy() {
		let transport = ScriptedTransport::default();
		let (_clock, gateway) = gateway(&transport);

		assert!(gateway.limiter().limit_for("/auth/login").is_some());
		assert_eq!(gateway.limiter().limit_for("/words").map(|limit| limit.capacity()), Some(2));
	}

	#[tokio::test]
	async fn unauthorized_response_stops_session_timers() {
		let transport = ScriptedTransport::default();
		let (clock, gateway) = gateway(&transport);

		gateway.login(_preludet::token_expiring_in(&*clock, "user-7", Duration::hours(1)), None);
		transport.push_json(401, serde_json::json!({ "message": "expired" }));

		let error = gateway.get("/words").await.expect_err("401 should fail.");

		assert_eq!(error.kind(), crate::error::ApiErrorKind::Auth);
		assert!(!gateway.session().has_token());
		assert!(!gateway.supervisor().is_running());
	}

	#[test]
	fn gateway_without_runtime_still_stores_the_session() {
		let transport = ScriptedTransport::default();
		let (clock, gateway) = gateway(&transport);

		let token = _preludet::token_expiring_in(&*clock, "u", Duration::hours(1));

		assert!(gateway.login(token, None));
		assert_eq!(gateway.session().user_id().as_deref(), Some("u"));
		assert!(!gateway.supervisor().is_running());
	}
}
