//! Session timers: the proactive refresh interval and the session timeout.
//!
//! Both timers are [`ScheduledTask`]s owned by the supervisor and hold only a weak reference to
//! its state, so dropping or shutting down the supervisor stops them. Refreshes are
//! singleflight: concurrent callers queue on one async mutex and re-check `needs_refresh` once
//! they hold it.

// std
use std::sync::Weak;
// self
use crate::{
	_prelude::*,
	auth::{InvalidationReason, SessionStore, TokenSource, TokenSourceError},
	clock::{self, ScheduledTask},
	config::SessionConfig,
	obs::{self, OpKind, OpOutcome, OpSpan},
	telemetry::{MetricEvent, MetricsBatcher},
};

/// Owns the refresh interval and the session timeout of one session.
#[derive(Clone)]
pub struct SessionSupervisor {
	state: Arc<SupervisorState>,
}
impl SessionSupervisor {
	/// Creates an idle supervisor; call [`SessionSupervisor::start`] once a token is stored.
	pub fn new(
		session: Arc<SessionStore>,
		source: Arc<dyn TokenSource>,
		config: SessionConfig,
	) -> Self {
		Self {
			state: Arc::new(SupervisorState {
				session,
				source,
				config,
				batcher: None,
				refresh_guard: AsyncMutex::new(()),
				refresh_task: Default::default(),
				timeout_task: Default::default(),
			}),
		}
	}

	/// Reports refresh outcomes as auth events.
	///
	/// Must be called before the supervisor is cloned or started.
	pub fn with_batcher(mut self, batcher: MetricsBatcher) -> Self {
		if let Some(state) = Arc::get_mut(&mut self.state) {
			state.batcher = Some(batcher);
		} else {
			tracing::warn!("Supervisor already shared; batcher not installed.");
		}

		self
	}

	/// Arms (or re-arms) both timers.
	pub fn start(&self) {
		self.state.arm_refresh();
		self.state.arm_timeout();
	}

	/// Cancels both timers.
	pub fn shutdown(&self) {
		self.state.refresh_task.lock().take();
		self.state.timeout_task.lock().take();
	}

	/// Returns `true` while the refresh interval is armed.
	pub fn is_running(&self) -> bool {
		self.state.refresh_task.lock().as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Returns `true` while the session timeout is armed.
	pub fn has_timeout(&self) -> bool {
		self.state.timeout_task.lock().as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Refreshes the token when it is due; returns whether a new token was stored.
	pub async fn refresh_if_needed(&self) -> Result<bool, TokenSourceError> {
		self.state.refresh(false).await
	}

	/// Refreshes the token unconditionally.
	pub async fn refresh_now(&self) -> Result<bool, TokenSourceError> {
		self.state.refresh(true).await
	}
}
impl Debug for SessionSupervisor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionSupervisor")
			.field("config", &self.state.config)
			.field("running", &self.is_running())
			.field("timeout_armed", &self.has_timeout())
			.finish()
	}
}

struct SupervisorState {
	session: Arc<SessionStore>,
	source: Arc<dyn TokenSource>,
	config: SessionConfig,
	batcher: Option<MetricsBatcher>,
	refresh_guard: AsyncMutex<()>,
	refresh_task: Mutex<Option<ScheduledTask>>,
	timeout_task: Mutex<Option<ScheduledTask>>,
}
impl SupervisorState {
	fn arm_refresh(self: &Arc<Self>) {
		let period = self.config.refresh_check_interval();

		if !period.is_positive() {
			tracing::warn!("Refresh check interval is not positive; proactive refresh disabled.");

			return;
		}

		let weak = Arc::downgrade(self);
		let task = ScheduledTask::spawn("session_refresh", async move {
			loop {
				clock::sleep(period).await;

				let Some(state) = weak.upgrade() else { break };

				if !state.session.has_token() {
					continue;
				}
				if let Err(e) = state.refresh(false).await {
					tracing::warn!(error = %e, "Proactive token refresh failed.");
				}
			}
		});

		*self.refresh_task.lock() = task;
	}

	fn arm_timeout(self: &Arc<Self>) {
		let weak = Arc::downgrade(self);
		let task = ScheduledTask::spawn("session_timeout", Self::watch_expiry(weak));

		*self.timeout_task.lock() = task;
	}

	async fn watch_expiry(weak: Weak<Self>) {
		loop {
			let wait = {
				let Some(state) = weak.upgrade() else { return };

				state.time_to_expiry()
			};

			clock::sleep(wait).await;

			let Some(state) = weak.upgrade() else { return };
			let now = state.session.clock().now();

			// A refresh may have extended the session while this task slept.
			if state.session.expires_at().is_some_and(|expires_at| expires_at > now) {
				continue;
			}

			tracing::info!("Session lifetime elapsed.");
			state.session.invalidate(InvalidationReason::Expired);

			return;
		}
	}

	fn time_to_expiry(&self) -> Duration {
		match self.session.expires_at() {
			Some(expires_at) => expires_at - self.session.clock().now(),
			None => self.config.timeout_fallback(),
		}
	}

	async fn refresh(self: &Arc<Self>, force: bool) -> Result<bool, TokenSourceError> {
		let span = OpSpan::new(OpKind::Refresh, if force { "refresh_now" } else { "refresh" });
		let _singleflight = self.refresh_guard.lock().await;

		if !force && !self.session.needs_refresh() {
			return Ok(false);
		}

		obs::record_op_outcome(OpKind::Refresh, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let issued = self.source.fetch_token().await?;

				if self.session.set_token(issued.token, issued.expires_at) {
					Ok(())
				} else {
					Err(TokenSourceError::Unavailable {
						message: "issued token carries no usable expiry".into(),
					})
				}
			})
			.await;
		let now = self.session.clock().now();

		match result {
			Ok(()) => {
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::Success);
				tracing::debug!("Session token refreshed.");
				self.track(MetricEvent::auth("token_refreshed", true, now));
				self.arm_timeout();

				Ok(true)
			},
			Err(e) => {
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::Failure);
				self.track(
					MetricEvent::auth("token_refreshed", false, now).with_error(e.to_string()),
				);

				Err(e)
			},
		}
	}

	fn track(&self, event: MetricEvent) {
		if let Some(batcher) = &self.batcher {
			batcher.track_auth_event(event);
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::{
		_preludet,
		auth::{IssuedToken, TokenSourceFuture},
		clock::{Clock, SystemClock},
	};

	struct RenewingSource {
		clock: Arc<dyn Clock>,
		ttl: Option<Duration>,
		calls: AtomicUsize,
	}
	impl TokenSource for RenewingSource {
		fn fetch_token(&self) -> TokenSourceFuture<'_> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				match self.ttl {
					Some(ttl) => Ok(IssuedToken::new(_preludet::token_expiring_in(
						self.clock.as_ref(),
						"user-1",
						ttl,
					))),
					None => Err(TokenSourceError::LoginRequired),
				}
			})
		}
	}

	fn fixture(
		ttl: Option<Duration>,
		config: SessionConfig,
	) -> (Arc<dyn Clock>, Arc<SessionStore>, Arc<RenewingSource>, SessionSupervisor) {
		let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
		let session = SessionStore::new(_preludet::test_obfuscated_store(), clock.clone());
		let source =
			Arc::new(RenewingSource { clock: clock.clone(), ttl, calls: AtomicUsize::new(0) });
		let supervisor = SessionSupervisor::new(session.clone(), source.clone(), config);

		(clock, session, source, supervisor)
	}

	fn fast_checks() -> SessionConfig {
		SessionConfig { refresh_check_interval_secs: 10, ..Default::default() }
	}

	#[tokio::test(start_paused = true)]
	async fn refresh_timer_replaces_a_token_close_to_expiry() {
		let (clock, session, source, supervisor) =
			fixture(Some(Duration::hours(1)), fast_checks());

		session.set_token(
			_preludet::token_expiring_in(clock.as_ref(), "user-1", Duration::seconds(30)),
			None,
		);

		assert!(session.needs_refresh());

		supervisor.start();
		tokio::time::sleep(std::time::Duration::from_secs(11)).await;

		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
		assert!(!session.needs_refresh());
		assert!(session.get_token_remaining_time() > Duration::minutes(59));
		assert!(supervisor.has_timeout());
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_invalidates_when_refresh_keeps_failing() {
		let (clock, session, _source, supervisor) = fixture(None, SessionConfig::default());
		let reasons = Arc::new(Mutex::new(Vec::new()));
		let seen = reasons.clone();

		session.on_session_invalidated(move |reason| seen.lock().push(reason));
		session.set_token(
			_preludet::token_expiring_in(clock.as_ref(), "user-1", Duration::minutes(2)),
			None,
		);
		supervisor.start();
		tokio::time::sleep(std::time::Duration::from_secs(121)).await;

		assert_eq!(*reasons.lock(), vec![InvalidationReason::Expired]);
		assert!(!session.has_token());
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_refreshes_share_one_fetch() {
		let (clock, session, source, supervisor) =
			fixture(Some(Duration::hours(1)), SessionConfig::default());

		session.set_token(
			_preludet::token_expiring_in(clock.as_ref(), "user-1", Duration::minutes(1)),
			None,
		);

		let (first, second) =
			tokio::join!(supervisor.refresh_if_needed(), supervisor.refresh_if_needed());
		let stored = [first, second].into_iter().filter(|outcome| matches!(outcome, Ok(true)));

		assert_eq!(stored.count(), 1);
		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
		assert!(matches!(supervisor.refresh_now().await, Ok(true)));
		assert_eq!(source.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_cancels_both_timers() {
		let (clock, session, source, supervisor) =
			fixture(Some(Duration::hours(1)), fast_checks());
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = fired.clone();

		session.on_session_invalidated(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		session.set_token(
			_preludet::token_expiring_in(clock.as_ref(), "user-1", Duration::seconds(30)),
			None,
		);
		supervisor.start();

		assert!(supervisor.is_running());

		supervisor.shutdown();
		tokio::time::sleep(std::time::Duration::from_secs(120)).await;

		assert!(!supervisor.is_running());
		assert_eq!(source.calls.load(Ordering::SeqCst), 0);
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}
}
