//! Bearer tokens, their claims, the session store, and the lifecycle around them (server-side
//! validation, proactive refresh, session timeout).

pub mod claims;
pub mod secret;
pub mod session;
pub mod supervisor;
pub mod validation;

pub use claims::*;
pub use secret::*;
pub use session::*;
pub use supervisor::*;
pub use validation::*;

// self
use crate::_prelude::*;

/// Boxed future returned by [`TokenSource::fetch_token`].
pub type TokenSourceFuture<'a> =
	Pin<Box<dyn Future<Output = Result<IssuedToken, TokenSourceError>> + 'a + Send>>;

/// Identity-provider collaborator that can mint a fresh bearer token silently.
///
/// The login/redirect flow itself lives outside this crate; implementations typically wrap the
/// provider SDK's "get token silently" call.
pub trait TokenSource
where
	Self: Send + Sync,
{
	/// Obtains a fresh token for the signed-in user.
	fn fetch_token(&self) -> TokenSourceFuture<'_>;
}

/// Token handed over by a [`TokenSource`].
#[derive(Clone, Debug)]
pub struct IssuedToken {
	/// Bearer credential.
	pub token: BearerToken,
	/// Explicit expiry; when absent it is decoded from the token's claims.
	pub expires_at: Option<OffsetDateTime>,
}
impl IssuedToken {
	/// Wraps a token whose expiry is carried in its claims.
	pub fn new(token: impl Into<BearerToken>) -> Self {
		Self { token: token.into(), expires_at: None }
	}

	/// Sets an explicit expiry.
	pub fn with_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}
}

/// Failure reported by a [`TokenSource`].
#[derive(Clone, Debug, ThisError)]
pub enum TokenSourceError {
	/// The user must go through the interactive login flow again.
	#[error("Interactive login is required.")]
	LoginRequired,
	/// The provider could not be reached or answered unexpectedly.
	#[error("Identity provider is unavailable: {message}.")]
	Unavailable {
		/// Provider- or transport-supplied message.
		message: String,
	},
}
