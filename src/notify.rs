//! User-visible notices, deduplicated per failure kind.

// self
use crate::{
	_prelude::*,
	clock::Clock,
	config::NotifyConfig,
	error::{ApiError, ApiErrorKind},
};

/// Transient, toast-like notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
	/// Failure kind the notice reports.
	pub kind: ApiErrorKind,
	/// Text shown to the user.
	pub message: String,
}

/// Presents notices to the user.
pub trait Notifier
where
	Self: Send + Sync,
{
	/// Shows `notice`.
	fn notify(&self, notice: &Notice);
}

/// Notifier that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;
impl Notifier for TracingNotifier {
	fn notify(&self, notice: &Notice) {
		tracing::warn!(kind = %notice.kind, message = %notice.message, "User notice.");
	}
}

/// Forwards at most one notice per kind within that kind's cool-down.
pub struct NotificationGate {
	notifier: Arc<dyn Notifier>,
	config: NotifyConfig,
	clock: Arc<dyn Clock>,
	last_shown: Mutex<HashMap<ApiErrorKind, OffsetDateTime>>,
}
impl NotificationGate {
	/// Creates a gate in front of `notifier`.
	pub fn new(notifier: Arc<dyn Notifier>, config: NotifyConfig, clock: Arc<dyn Clock>) -> Self {
		Self { notifier, config, clock, last_shown: Default::default() }
	}

	/// Shows the user-facing message for `error`; returns `false` when suppressed.
	pub fn notify_error(&self, error: &ApiError) -> bool {
		self.notify(error.kind(), user_message(error))
	}

	/// Shows `message` under `kind`; returns `false` when suppressed.
	pub fn notify(&self, kind: ApiErrorKind, message: impl Into<String>) -> bool {
		let now = self.clock.now();

		{
			let mut last_shown = self.last_shown.lock();

			if let Some(previous) = last_shown.get(&kind)
				&& now - *previous < self.config.cooldown_for(kind)
			{
				tracing::debug!(%kind, "Notice suppressed within cool-down.");

				return false;
			}

			last_shown.insert(kind, now);
		}

		self.notifier.notify(&Notice { kind, message: message.into() });

		true
	}

	/// Forgets every cool-down.
	pub fn reset(&self) {
		self.last_shown.lock().clear();
	}
}
impl Debug for NotificationGate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("NotificationGate").field("config", &self.config).finish()
	}
}

/// Text shown to the user for `error`.
pub fn user_message(error: &ApiError) -> String {
	match error.kind() {
		ApiErrorKind::Auth => "Your session has expired. Please sign in again.".into(),
		ApiErrorKind::RateLimit => {
			let secs = error
				.retry_after()
				.map(|wait| (wait.whole_milliseconds() + 999) / 1_000)
				.unwrap_or(60);

			format!("Too many requests. Please wait {secs} seconds before trying again.")
		},
		ApiErrorKind::Network => "Network error. Check your connection and try again.".into(),
		ApiErrorKind::Timeout => "The request timed out. Please try again.".into(),
		ApiErrorKind::Permission
		| ApiErrorKind::Server
		| ApiErrorKind::Validation
		| ApiErrorKind::Unknown => {
			let message = error.message().trim();

			if message.is_empty() {
				"Something went wrong. Please try again.".into()
			} else {
				message.into()
			}
		},
	}
}
