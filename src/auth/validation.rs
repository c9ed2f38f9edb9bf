//! Server-side token validation.
//!
//! A pass moves the validator from `Idle` (or a terminal state) to `Validating`, then to
//! `Authenticated` or `Expired`. Passes only start through a [`ValidationTicket`], and at most one
//! ticket exists at a time. Retries after the first attempt discard the cached token and ask the
//! [`TokenSource`] for a fresh one before calling `GET /auth/validate` again; the state stays
//! `Validating` for the whole retry window even though no token is stored for a moment.

// self
use crate::{
	_prelude::*,
	auth::{InvalidationReason, TokenSource},
	classify::{self, LocalFailure},
	clock,
	error::{ApiError, ApiErrorKind, ApiStatus},
	http::{ApiClient, ApiResponse, routes::VALIDATE_PATH},
	notify::NotificationGate,
	obs::{self, OpKind, OpOutcome, OpSpan},
	retry::RetryPolicy,
	telemetry::MetricEvent,
};

/// Where the validator currently is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ValidationState {
	/// No pass has run since construction or the last reset.
	#[default]
	Idle,
	/// A pass is running, retries included.
	Validating,
	/// The last pass confirmed the session.
	Authenticated {
		/// User id returned by the server.
		user_id: String,
	},
	/// The last pass exhausted its retries and cleared the session.
	Expired,
}
impl ValidationState {
	/// Returns `true` while a pass is running.
	pub fn is_validating(&self) -> bool {
		matches!(self, Self::Validating)
	}
}

/// Failures reported by [`TokenValidator::validate`].
#[derive(Clone, Debug, ThisError)]
pub enum ValidationError {
	/// Another pass holds the ticket.
	#[error("A validation pass is already running.")]
	InProgress,
	/// Every attempt failed; the session has been invalidated.
	#[error("Session validation failed after {attempts} attempts.")]
	Exhausted {
		/// Attempts made, the initial one included.
		attempts: u32,
		/// Failure of the last attempt.
		#[source]
		last: ApiError,
	},
}

/// Confirms the stored session against the backend.
pub struct TokenValidator {
	client: Arc<ApiClient>,
	source: Option<Arc<dyn TokenSource>>,
	notices: Option<Arc<NotificationGate>>,
	retry: RetryPolicy,
	state: Mutex<ValidationState>,
}
impl TokenValidator {
	/// Creates a validator using the token-validation retry policy.
	pub fn new(client: Arc<ApiClient>) -> Self {
		Self {
			client,
			source: None,
			notices: None,
			retry: RetryPolicy::token_validation(),
			state: Mutex::new(ValidationState::Idle),
		}
	}

	/// Installs the collaborator asked for a fresh token on retries.
	pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
		self.source = Some(source);

		self
	}

	/// Routes the exhaustion notice to a notification gate.
	pub fn with_notifications(mut self, notices: Arc<NotificationGate>) -> Self {
		self.notices = Some(notices);

		self
	}

	/// Overrides the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Current state.
	pub fn state(&self) -> ValidationState {
		self.state.lock().clone()
	}

	/// Claims the right to run a pass; `None` while another pass is running.
	pub fn try_begin(&self) -> Option<ValidationTicket<'_>> {
		let mut state = self.state.lock();

		if state.is_validating() {
			tracing::debug!("Validation already running; overlapping pass rejected.");

			return None;
		}

		*state = ValidationState::Validating;

		Some(ValidationTicket { validator: self, settled: false })
	}

	/// Runs one full pass and returns the confirmed user id.
	pub async fn validate(&self) -> Result<String, ValidationError> {
		let ticket = self.try_begin().ok_or(ValidationError::InProgress)?;

		ticket.run().await
	}

	/// Returns to `Idle` unless a pass is running.
	pub fn reset(&self) {
		let mut state = self.state.lock();

		if !state.is_validating() {
			*state = ValidationState::Idle;
		}
	}

	async fn attempt(&self) -> Result<String, ApiError> {
		let session = self.client.session();
		let user_id = session.user_id();

		if !self.client.limiter().wait_for_token(VALIDATE_PATH, user_id.as_deref()).await {
			let wait =
				self.client.limiter().get_remaining_wait_time(VALIDATE_PATH, user_id.as_deref());

			return Err(classify::classify(
				LocalFailure::RateLimited { wait }.into(),
				session.clock().now(),
			));
		}

		let response = self.client.get(VALIDATE_PATH).await?;

		extract_user_id(&response).ok_or_else(|| {
			ApiError::new(
				ApiErrorKind::Unknown,
				ApiStatus::Code(response.status),
				"Validation response carries no user id.",
			)
		})
	}

	async fn renew_credential(&self) {
		let session = self.client.session();

		session.clear_token();

		let Some(source) = &self.source else {
			tracing::debug!("No token source configured; retrying without a fresh token.");

			return;
		};

		match source.fetch_token().await {
			Ok(issued) =>
				if !session.set_token(issued.token, issued.expires_at) {
					tracing::warn!("Token source returned an unusable token.");
				},
			Err(e) => tracing::warn!(error = %e, "Token source could not supply a fresh token."),
		}
	}

	fn settle(&self, state: ValidationState) {
		*self.state.lock() = state;
	}
}
impl Debug for TokenValidator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenValidator")
			.field("state", &*self.state.lock())
			.field("retry", &self.retry)
			.field("has_token_source", &self.source.is_some())
			.finish()
	}
}

/// Exclusive right to run one validation pass.
///
/// Dropping an unfinished ticket (for example by cancelling the future driving
/// [`ValidationTicket::run`]) returns the validator to `Idle`.
#[derive(Debug)]
pub struct ValidationTicket<'a> {
	validator: &'a TokenValidator,
	settled: bool,
}
impl ValidationTicket<'_> {
	/// Validates the session, retrying with fresh credentials until the policy runs out.
	pub async fn run(mut self) -> Result<String, ValidationError> {
		let validator = self.validator;
		let span = OpSpan::new(OpKind::Validation, "validate");

		obs::record_op_outcome(OpKind::Validation, OpOutcome::Attempt);

		let result = span.instrument(Self::drive(validator)).await;

		self.settled = true;

		match &result {
			Ok(user_id) => {
				obs::record_op_outcome(OpKind::Validation, OpOutcome::Success);
				validator.settle(ValidationState::Authenticated { user_id: user_id.clone() });
			},
			Err(e) => {
				obs::record_op_outcome(OpKind::Validation, OpOutcome::Failure);
				tracing::warn!(error = %e, "Session validation exhausted; invalidating.");
				validator.client.session().invalidate(InvalidationReason::ValidationExhausted);
				validator.settle(ValidationState::Expired);

				if let Some(notices) = &validator.notices {
					notices.notify(
						ApiErrorKind::Auth,
						"Your session could not be verified. Please sign in again.",
					);
				}
			},
		}

		result
	}

	async fn drive(validator: &TokenValidator) -> Result<String, ValidationError> {
		let clock = validator.client.session().clock().clone();
		let mut retries = 0;

		loop {
			if retries > 0 {
				validator.renew_credential().await;
			}

			match validator.attempt().await {
				Ok(user_id) => {
					validator.client.batcher().track_auth_event(
						MetricEvent::auth("token_validated", true, clock.now())
							.with_user(user_id.as_str()),
					);

					return Ok(user_id);
				},
				Err(e) if validator.retry.has_retries_left(retries) => {
					let delay = validator.retry.delay_for(retries);

					tracing::debug!(
						kind = %e.kind(),
						retry = retries + 1,
						delay_ms = delay.whole_milliseconds() as i64,
						"Validation attempt failed; retrying."
					);
					obs::record_op_outcome(OpKind::Validation, OpOutcome::Retry);
					clock::sleep(delay).await;

					retries += 1;
				},
				Err(last) => {
					validator.client.batcher().track_auth_event(
						MetricEvent::auth("token_validation_failed", false, clock.now())
							.with_error(last.message()),
					);

					return Err(ValidationError::Exhausted { attempts: retries + 1, last });
				},
			}
		}
	}
}
impl Drop for ValidationTicket<'_> {
	fn drop(&mut self) {
		if !self.settled {
			tracing::debug!("Validation pass abandoned.");
			self.validator.settle(ValidationState::Idle);
		}
	}
}

/// Reads the user id from a validation payload: `id`, `userId`, or `sub`, at the top level or
/// under `user`.
pub fn extract_user_id(response: &ApiResponse) -> Option<String> {
	let body = response.json()?;
	let from = |value: &serde_json::Value| {
		["id", "userId", "sub"].iter().find_map(|field| match value.get(*field)? {
			serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
			serde_json::Value::Number(id) => Some(id.to_string()),
			_ => None,
		})
	};

	from(&body).or_else(|| body.get("user").and_then(from))
}
