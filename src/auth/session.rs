//! Session store: owns the bearer token, its expiry, and its decoded claims.
//!
//! Reads go through an in-memory [`SessionCache`] first and fall back to the obfuscated store.
//! The cache is updated synchronously by every write, so any read that follows a completed
//! [`SessionStore::set_token`] or [`SessionStore::clear_token`] observes it. Every operation is
//! total: failures are logged and surface as `None`, `false`, or zero.

// std
use std::sync::{
	Weak,
	atomic::{AtomicU64, Ordering},
};
// self
use crate::{
	_prelude::*,
	auth::{BearerToken, Claims},
	clock::Clock,
	store::{ObfuscatedStore, StorageEvent, SubscriptionId},
};

/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "auth_token";
/// Storage key for the token expiry (Unix seconds).
pub const EXPIRY_KEY: &str = "auth_token_expiry";
/// Storage key for the decoded claims (JSON).
pub const CLAIMS_KEY: &str = "auth_claims";

const SESSION_KEYS: [&str; 3] = [TOKEN_KEY, EXPIRY_KEY, CLAIMS_KEY];

/// Remaining lifetime below which a token should be refreshed proactively.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

/// Why a session was invalidated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvalidationReason {
	/// Explicit logout.
	Logout,
	/// An authenticated endpoint answered 401.
	Unauthorized,
	/// Server-side validation failed after every retry.
	ValidationExhausted,
	/// The session timeout fired after the token's lifetime ran out.
	Expired,
	/// Another tab removed the token.
	CrossTab,
}
impl InvalidationReason {
	/// Returns a stable label suitable for log or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Logout => "logout",
			Self::Unauthorized => "unauthorized",
			Self::ValidationExhausted => "validation_exhausted",
			Self::Expired => "expired",
			Self::CrossTab => "cross_tab",
		}
	}
}
impl Display for InvalidationReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Handle returned by [`SessionStore::on_session_invalidated`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvalidationHandlerId(u64);

type InvalidationHandler = Arc<dyn Fn(InvalidationReason) + Send + Sync>;

/// Last-known token, expiry, and claims.
///
/// Treated as empty on read once `expires_at` has passed.
#[derive(Clone, Debug, Default)]
pub struct SessionCache {
	token: Option<BearerToken>,
	expires_at: Option<OffsetDateTime>,
	claims: Option<Claims>,
}
impl SessionCache {
	fn live_token(&self, now: OffsetDateTime) -> Option<&BearerToken> {
		match (&self.token, self.expires_at) {
			(Some(token), Some(expires_at)) if expires_at > now => Some(token),
			_ => None,
		}
	}

	fn live_claims(&self, now: OffsetDateTime) -> Option<&Claims> {
		match (&self.claims, self.expires_at) {
			(Some(claims), Some(expires_at)) if expires_at > now => Some(claims),
			_ => None,
		}
	}
}

/// Owner of the bearer token, its expiry, and its claims.
pub struct SessionStore {
	store: Arc<ObfuscatedStore>,
	clock: Arc<dyn Clock>,
	refresh_buffer: Duration,
	cache: RwLock<SessionCache>,
	handlers: Mutex<Vec<(InvalidationHandlerId, InvalidationHandler)>>,
	next_handler: AtomicU64,
	subscription: Mutex<Option<SubscriptionId>>,
}
impl SessionStore {
	/// Creates a store and subscribes it to cross-tab removals on the store's broadcast.
	pub fn new(store: Arc<ObfuscatedStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
		Self::with_refresh_buffer(store, clock, DEFAULT_REFRESH_BUFFER)
	}

	/// Same as [`new`](Self::new) with a custom refresh buffer.
	pub fn with_refresh_buffer(
		store: Arc<ObfuscatedStore>,
		clock: Arc<dyn Clock>,
		refresh_buffer: Duration,
	) -> Arc<Self> {
		Arc::new_cyclic(|weak: &Weak<Self>| {
			let weak = weak.clone();
			let origin = store.origin();
			let subscription = store.broadcast().subscribe(move |event| {
				if event.origin != origin
					&& let Some(session) = weak.upgrade()
				{
					session.on_foreign_change(event);
				}
			});

			Self {
				store,
				clock,
				refresh_buffer,
				cache: RwLock::new(SessionCache::default()),
				handlers: Mutex::new(Vec::new()),
				next_handler: AtomicU64::new(1),
				subscription: Mutex::new(Some(subscription)),
			}
		})
	}

	/// Returns the token if one is stored and has not expired.
	pub fn get_token(&self) -> Option<BearerToken> {
		let now = self.clock.now();

		if let Some(token) = self.cache.read().live_token(now) {
			return Some(token.clone());
		}

		let Some(token) = self.store.get(TOKEN_KEY).map(BearerToken::new) else {
			self.reset_cache();

			return None;
		};
		let Some(expires_at) = self.stored_expiry().or_else(|| self.decoded_expiry(&token)) else {
			self.reset_cache();

			return None;
		};

		if expires_at <= now {
			tracing::debug!("Stored token has expired.");
			self.reset_cache();

			return None;
		}

		let mut cache = self.cache.write();

		cache.token = Some(token.clone());
		cache.expires_at = Some(expires_at);

		Some(token)
	}

	/// Persists `token`; when `expires_at` is omitted it is taken from the token's claims.
	///
	/// Returns `false` (and leaves the session untouched) when no expiry can be determined.
	pub fn set_token(
		&self,
		token: impl Into<BearerToken>,
		expires_at: Option<OffsetDateTime>,
	) -> bool {
		let token = token.into();

		if token.is_empty() {
			tracing::warn!("Refusing to store an empty token.");

			return false;
		}

		let claims = match Claims::decode(&token) {
			Ok(claims) => Some(claims),
			Err(e) => {
				tracing::warn!(error = %e, "Failed to decode token claims.");

				None
			},
		};
		let expires_at = match expires_at {
			Some(instant) => instant,
			None => match claims.as_ref().map(Claims::expires_at) {
				Some(Ok(instant)) => instant,
				_ => {
					tracing::error!("Token carries no usable expiry; session not updated.");

					return false;
				},
			},
		};

		self.store.set(TOKEN_KEY, token.expose());
		self.store.set(EXPIRY_KEY, &expires_at.unix_timestamp().to_string());

		match claims.as_ref().map(serde_json::to_string) {
			Some(Ok(json)) => self.store.set(CLAIMS_KEY, &json),
			Some(Err(e)) => {
				tracing::warn!(error = %e, "Failed to serialize claims.");
				self.store.remove(CLAIMS_KEY);
			},
			None => self.store.remove(CLAIMS_KEY),
		}

		*self.cache.write() =
			SessionCache { token: Some(token), expires_at: Some(expires_at), claims };

		tracing::debug!(expires_at = %expires_at, "Session token stored.");

		true
	}

	/// Removes every session key and empties the cache. Idempotent.
	pub fn clear_token(&self) {
		for key in SESSION_KEYS {
			if self.store.has(key) {
				self.store.remove(key);
			}
		}

		self.reset_cache();
	}

	/// Clears the session and notifies every invalidation handler.
	pub fn invalidate(&self, reason: InvalidationReason) {
		tracing::info!(reason = reason.as_str(), "Session invalidated.");
		self.clear_token();
		self.notify(reason);
	}

	/// Cheap existence check: cache first, then storage. Does not check expiry.
	pub fn has_token(&self) -> bool {
		self.cache.read().token.is_some() || self.store.has(TOKEN_KEY)
	}

	/// Returns `true` when there is no token or its expiry has passed.
	pub fn is_token_expired(&self) -> bool {
		match self.expires_at() {
			Some(expires_at) => expires_at <= self.clock.now(),
			None => true,
		}
	}

	/// Returns `true` when the remaining lifetime is below the refresh buffer, or unknown.
	pub fn needs_refresh(&self) -> bool {
		match self.expires_at() {
			Some(expires_at) => expires_at - self.clock.now() < self.refresh_buffer,
			None => true,
		}
	}

	/// Returns the claims of the current token unless it has expired.
	pub fn get_token_claims(&self) -> Option<Claims> {
		let now = self.clock.now();

		if let Some(claims) = self.cache.read().live_claims(now) {
			return Some(claims.clone());
		}
		// An explicit expiry shorter than the claims' own wins.
		if self.expires_at().is_some_and(|expires_at| expires_at <= now) {
			self.reset_cache();

			return None;
		}

		let cached = self.cache.read().token.clone();
		let token = cached.or_else(|| self.store.get(TOKEN_KEY).map(BearerToken::new))?;
		let claims = match Claims::decode(&token) {
			Ok(claims) => claims,
			Err(e) => {
				tracing::warn!(error = %e, "Failed to decode token claims.");
				self.reset_cache();

				return None;
			},
		};

		if claims.is_expired_at(now) {
			self.reset_cache();

			return None;
		}

		let expires_at = self.expires_at().or_else(|| claims.expires_at().ok());
		let mut cache = self.cache.write();

		cache.token = Some(token);
		cache.expires_at = expires_at;
		cache.claims = Some(claims.clone());

		Some(claims)
	}

	/// Seconds left before the token expires, floored at zero.
	pub fn get_token_remaining_time(&self) -> Duration {
		self.get_token_claims()
			.map(|claims| claims.remaining_at(self.clock.now()))
			.unwrap_or(Duration::ZERO)
	}

	/// Subject of the current token, if any.
	pub fn user_id(&self) -> Option<String> {
		self.get_token_claims().map(|claims| claims.sub)
	}

	/// Expiry of the current token from cache, storage, or claims.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		if let Some(expires_at) = self.cache.read().expires_at {
			return Some(expires_at);
		}

		self.stored_expiry().or_else(|| {
			let token = self.store.get(TOKEN_KEY).map(BearerToken::new)?;

			self.decoded_expiry(&token)
		})
	}

	/// Drops the in-memory cache so the next read goes back to storage.
	pub fn discard_cache(&self) {
		self.reset_cache();
	}

	/// Registers a handler invoked whenever the session is invalidated.
	pub fn on_session_invalidated(
		&self,
		handler: impl 'static + Fn(InvalidationReason) + Send + Sync,
	) -> InvalidationHandlerId {
		let id = InvalidationHandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));

		self.handlers.lock().push((id, Arc::new(handler)));

		id
	}

	/// Removes a handler; unknown ids are ignored.
	pub fn remove_invalidation_handler(&self, id: InvalidationHandlerId) {
		self.handlers.lock().retain(|(existing, _)| *existing != id);
	}

	/// Obfuscated store the session is persisted in.
	pub fn store(&self) -> &Arc<ObfuscatedStore> {
		&self.store
	}

	/// Clock the store evaluates expiry against.
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	fn on_foreign_change(&self, event: &StorageEvent) {
		if event.key == TOKEN_KEY && event.new_value.is_none() {
			self.reset_cache();
			self.notify(InvalidationReason::CrossTab);
		}
	}

	fn notify(&self, reason: InvalidationReason) {
		let handlers: Vec<_> = self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();

		for handler in handlers {
			handler(reason);
		}
	}

	fn reset_cache(&self) {
		*self.cache.write() = SessionCache::default();
	}

	fn stored_expiry(&self) -> Option<OffsetDateTime> {
		let raw = self.store.get(EXPIRY_KEY)?;
		let secs = match raw.trim().parse::<i64>() {
			Ok(secs) => secs,
			Err(e) => {
				tracing::warn!(error = %e, "Stored token expiry is not a number.");

				return None;
			},
		};

		OffsetDateTime::from_unix_timestamp(secs).ok()
	}

	fn decoded_expiry(&self, token: &BearerToken) -> Option<OffsetDateTime> {
		match Claims::decode(token).and_then(|claims| claims.expires_at()) {
			Ok(expires_at) => Some(expires_at),
			Err(e) => {
				tracing::warn!(error = %e, "Failed to derive token expiry from claims.");

				None
			},
		}
	}
}
impl Drop for SessionStore {
	fn drop(&mut self) {
		if let Some(id) = self.subscription.lock().take() {
			self.store.broadcast().unsubscribe(id);
		}
	}
}
impl Debug for SessionStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let cache = self.cache.read();

		f.debug_struct("SessionStore")
			.field("cached_token", &cache.token.is_some())
			.field("cached_expiry", &cache.expires_at)
			.field("refresh_buffer", &self.refresh_buffer)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;
	use crate::{
		_preludet::{test_clock, test_device_profile, test_obfuscated_store, token_expiring_in},
		clock::ManualClock,
		store::{MemoryBackend, StorageBroadcast},
	};

	fn session(clock: &Arc<ManualClock>) -> Arc<SessionStore> {
		SessionStore::new(test_obfuscated_store(), clock.clone())
	}

	#[test]
	fn token_is_visible_until_expiry() {
		let clock = test_clock();
		let session = session(&clock);
		let token = token_expiring_in(clock.as_ref(), "user-1", Duration::minutes(10));

		assert!(session.set_token(token.as_str(), None));
		assert_eq!(session.get_token().map(|t| t.expose().to_owned()), Some(token));

		clock.advance(Duration::minutes(10));

		assert_eq!(session.get_token(), None);
		assert!(session.is_token_expired());
		assert_eq!(session.get_token_claims(), None);
	}

	#[test]
	fn explicit_expiry_overrides_claims() {
		let clock = test_clock();
		let session = session(&clock);
		let token = token_expiring_in(clock.as_ref(), "user-1", Duration::hours(1));

		assert!(session.set_token(token.as_str(), Some(clock.now() + Duration::seconds(30))));

		clock.advance(Duration::seconds(31));

		assert_eq!(session.get_token_claims(), None);
		assert_eq!(session.get_token_remaining_time(), Duration::ZERO);
		assert_eq!(session.get_token(), None);
		assert!(session.is_token_expired());
	}

	#[test]
	fn opaque_tokens_need_an_explicit_expiry() {
		let clock = test_clock();
		let session = session(&clock);

		assert!(!session.set_token("opaque", None));
		assert!(!session.has_token());
		assert!(session.set_token("opaque", Some(clock.now() + Duration::minutes(1))));
		assert_eq!(session.get_token().as_ref().map(BearerToken::expose), Some("opaque"));
		assert_eq!(session.get_token_claims(), None);
	}

	#[test]
	fn storage_is_reread_after_cache_discard() {
		let clock = test_clock();
		let session = session(&clock);
		let token = token_expiring_in(clock.as_ref(), "user-2", Duration::hours(1));

		session.set_token(token.as_str(), None);
		session.discard_cache();

		assert_eq!(session.get_token().map(|t| t.expose().to_owned()), Some(token));
		assert_eq!(session.user_id().as_deref(), Some("user-2"));
		assert_eq!(session.get_token_remaining_time(), Duration::hours(1));
	}

	#[test]
	fn refresh_buffer_drives_needs_refresh() {
		let clock = test_clock();
		let session = session(&clock);

		assert!(session.needs_refresh());

		session.set_token(token_expiring_in(clock.as_ref(), "u", Duration::minutes(6)), None);

		assert!(!session.needs_refresh());

		clock.advance(Duration::minutes(2));

		assert!(session.needs_refresh());
	}

	#[test]
	fn invalidation_notifies_handlers() {
		let clock = test_clock();
		let session = session(&clock);
		let reasons = Arc::new(Mutex::new(Vec::new()));
		let sink = reasons.clone();
		let id = session.on_session_invalidated(move |reason| sink.lock().push(reason));

		session.set_token(token_expiring_in(clock.as_ref(), "u", Duration::hours(1)), None);
		session.invalidate(InvalidationReason::Unauthorized);
		session.remove_invalidation_handler(id);
		session.invalidate(InvalidationReason::Logout);

		assert!(!session.has_token());
		assert_eq!(*reasons.lock(), vec![InvalidationReason::Unauthorized]);
	}

	#[test]
	fn cross_tab_removal_invalidates_other_tabs_only() {
		let clock = test_clock();
		let backend = Arc::new(MemoryBackend::default());
		let bus = StorageBroadcast::default();
		let tab_a = SessionStore::new(
			Arc::new(ObfuscatedStore::new(backend.clone(), test_device_profile(), bus.clone())),
			clock.clone(),
		);
		let tab_b = SessionStore::new(
			Arc::new(ObfuscatedStore::new(backend, test_device_profile(), bus.clone())),
			clock.clone(),
		);
		let a_hits = Arc::new(AtomicUsize::new(0));
		let b_hits = Arc::new(AtomicUsize::new(0));
		let a_counter = a_hits.clone();
		let b_counter = b_hits.clone();

		tab_a.on_session_invalidated(move |_| {
			a_counter.fetch_add(1, Ordering::SeqCst);
		});
		tab_b.on_session_invalidated(move |reason| {
			assert_eq!(reason, InvalidationReason::CrossTab);
			b_counter.fetch_add(1, Ordering::SeqCst);
		});
		tab_a.set_token(token_expiring_in(clock.as_ref(), "u", Duration::hours(1)), None);

		assert!(tab_b.get_token().is_some());

		tab_a.clear_token();

		assert_eq!(a_hits.load(Ordering::SeqCst), 0);
		assert_eq!(b_hits.load(Ordering::SeqCst), 1);
		assert!(!tab_b.has_token());
		assert_eq!(tab_b.get_token(), None);

		drop(tab_a);
		drop(tab_b);

		assert_eq!(bus.listener_count(), 0);
	}
}
