//! Claims carried in the payload segment of a bearer token.
//!
//! Tokens are decoded, not verified: signature checks belong to the identity provider and the
//! backend. The session layer only needs the subject and the expiry.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{_prelude::*, auth::BearerToken};

/// Errors emitted while decoding token claims.
#[derive(Debug, ThisError)]
pub enum ClaimsError {
	/// The token does not have a `header.payload.signature` shape.
	#[error("Token is not a three-segment bearer token.")]
	Malformed,
	/// The payload segment is not valid base64url.
	#[error("Token payload is not valid base64url.")]
	Encoding,
	/// The payload is not the expected JSON document.
	#[error("Token payload is not valid claims JSON.")]
	Json(#[from] serde_path_to_error::Error<serde_json::Error>),
	/// The expiry claim cannot be represented as an instant.
	#[error("Token expiry claim is out of range.")]
	ExpiryOutOfRange,
}

/// Audience claim, which providers emit either as a string or a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
	/// Single audience.
	One(String),
	/// Several audiences.
	Many(Vec<String>),
}
impl Audience {
	/// Returns `true` if `value` is one of the audiences.
	pub fn contains(&self, value: &str) -> bool {
		match self {
			Self::One(aud) => aud == value,
			Self::Many(auds) => auds.iter().any(|aud| aud == value),
		}
	}
}
impl Default for Audience {
	fn default() -> Self {
		Self::Many(Vec::new())
	}
}

/// Decoded token payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
	/// Subject (user) identifier.
	pub sub: String,
	/// Expiry, seconds since the Unix epoch.
	pub exp: i64,
	/// Issued-at, seconds since the Unix epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iat: Option<i64>,
	/// Issuer.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	/// Intended audience(s).
	#[serde(default)]
	pub aud: Audience,
	/// Every other claim (roles, permissions, tenant, organization, ...).
	#[serde(flatten)]
	pub extra: BTreeMap<String, serde_json::Value>,
}
impl Claims {
	/// Decodes the payload segment of `token`.
	pub fn decode(token: &BearerToken) -> Result<Self, ClaimsError> {
		let mut segments = token.expose().split('.');
		let (Some(_header), Some(payload), Some(_signature), None) =
			(segments.next(), segments.next(), segments.next(), segments.next())
		else {
			return Err(ClaimsError::Malformed);
		};
		let bytes = URL_SAFE_NO_PAD
			.decode(payload.trim_end_matches('='))
			.map_err(|_| ClaimsError::Encoding)?;
		let mut de = serde_json::Deserializer::from_slice(&bytes);

		Ok(serde_path_to_error::deserialize(&mut de)?)
	}

	/// Expiry as an instant.
	pub fn expires_at(&self) -> Result<OffsetDateTime, ClaimsError> {
		OffsetDateTime::from_unix_timestamp(self.exp).map_err(|_| ClaimsError::ExpiryOutOfRange)
	}

	/// Returns `true` once `now` has reached the expiry.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		self.exp <= now.unix_timestamp()
	}

	/// Whole seconds left before expiry, floored at zero.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		Duration::seconds((self.exp - now.unix_timestamp()).max(0))
	}

	/// Email claim, when present.
	pub fn email(&self) -> Option<&str> {
		self.lookup("email").and_then(|value| value.as_str())
	}

	/// Role names, from a plain `roles` claim or a namespaced `.../roles` claim.
	pub fn roles(&self) -> Vec<String> {
		self.string_list("roles")
	}

	/// Permission names, from a plain or namespaced `permissions` claim.
	pub fn permissions(&self) -> Vec<String> {
		self.string_list("permissions")
	}

	/// Tenant identifier, when present.
	pub fn tenant(&self) -> Option<&str> {
		self.lookup("tenant").and_then(|value| value.as_str())
	}

	/// Organization identifier (`org_id` or `organization`), when present.
	pub fn organization(&self) -> Option<&str> {
		self.lookup("org_id")
			.or_else(|| self.lookup("organization"))
			.and_then(|value| value.as_str())
	}

	fn lookup(&self, name: &str) -> Option<&serde_json::Value> {
		self.extra.get(name).or_else(|| {
			self.extra
				.iter()
				.find(|(key, _)| key.rsplit('/').next() == Some(name))
				.map(|(_, value)| value)
		})
	}

	fn string_list(&self, name: &str) -> Vec<String> {
		match self.lookup(name) {
			Some(serde_json::Value::Array(items)) =>
				items.iter().filter_map(|item| item.as_str().map(str::to_owned)).collect(),
			Some(serde_json::Value::String(single)) =>
				single.split_whitespace().map(str::to_owned).collect(),
			_ => Vec::new(),
		}
	}
}
