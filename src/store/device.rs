//! Device signals, the key material derived from them, and the reversible obfuscation applied to
//! persisted values.
//!
//! This is at-rest obfuscation, not encryption: anyone holding the same device signals can
//! reverse it. It keeps tokens out of casual inspection of the storage area and nothing more.

// std
use std::sync::OnceLock;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const CIPHER_PREFIX: &str = "v1:";

/// Errors emitted while obfuscating or revealing a value.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ObfuscationError {
	/// The device profile carries no usable signal to derive key material from.
	#[error("Device profile carries no signals; key material is unavailable.")]
	KeyUnavailable,
	/// The stored value is not a well-formed obfuscated payload.
	#[error("Stored value is not a valid obfuscated payload.")]
	Encoding,
}

/// Environment signals a stable-but-unique key is derived from.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
	/// Browser or client user agent.
	pub user_agent: String,
	/// Preferred locale (e.g. `en-US`).
	pub locale: String,
	/// Screen geometry (`{width}x{height}x{depth}`).
	pub screen: String,
	/// Page origin.
	pub origin: String,
	#[serde(skip)]
	key: OnceLock<[u8; 32]>,
}
impl DeviceProfile {
	/// Creates a profile from raw signals.
	pub fn new(
		user_agent: impl Into<String>,
		locale: impl Into<String>,
		screen: impl Into<String>,
		origin: impl Into<String>,
	) -> Self {
		Self {
			user_agent: user_agent.into(),
			locale: locale.into(),
			screen: screen.into(),
			origin: origin.into(),
			key: OnceLock::new(),
		}
	}

	/// Returns `true` when no signal is populated.
	pub fn is_blank(&self) -> bool {
		[&self.user_agent, &self.locale, &self.screen, &self.origin]
			.iter()
			.all(|signal| signal.trim().is_empty())
	}

	/// Derived key material, computed once per profile.
	pub fn key_material(&self) -> Result<&[u8; 32], ObfuscationError> {
		if self.is_blank() {
			return Err(ObfuscationError::KeyUnavailable);
		}

		Ok(self.key.get_or_init(|| {
			let mut hasher = Sha256::new();

			for signal in [&self.user_agent, &self.locale, &self.screen, &self.origin] {
				hasher.update(signal.as_bytes());
				hasher.update([0x1f]);
			}

			hasher.finalize().into()
		}))
	}

	/// Opaque blob sent as the `X-Device-Fingerprint` header.
	pub fn fingerprint(&self) -> String {
		let raw = format!("{}|{}|{}|{}", self.user_agent, self.locale, self.screen, self.origin);

		STANDARD.encode(raw)
	}

	/// Obfuscates `plain` with this profile's key material.
	pub fn seal(&self, plain: &str) -> Result<String, ObfuscationError> {
		let key = self.key_material()?;
		let mut bytes = plain.as_bytes().to_vec();

		apply_keystream(key, &mut bytes);

		Ok(format!("{CIPHER_PREFIX}{}", STANDARD.encode(bytes)))
	}

	/// Reverses [`seal`](Self::seal).
	///
	/// Returns an empty string when the payload decodes to nothing usable, so callers can fall
	/// back to the raw stored value.
	pub fn open(&self, sealed: &str) -> Result<String, ObfuscationError> {
		let key = self.key_material()?;
		let Some(body) = sealed.strip_prefix(CIPHER_PREFIX) else {
			return Ok(String::new());
		};
		let mut bytes = STANDARD.decode(body).map_err(|_| ObfuscationError::Encoding)?;

		apply_keystream(key, &mut bytes);

		Ok(String::from_utf8(bytes).unwrap_or_default())
	}
}
impl Debug for DeviceProfile {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceProfile")
			.field("user_agent", &self.user_agent)
			.field("locale", &self.locale)
			.field("screen", &self.screen)
			.field("origin", &self.origin)
			.finish()
	}
}
impl Default for DeviceProfile {
	fn default() -> Self {
		Self::new("", "", "", "")
	}
}

fn apply_keystream(key: &[u8; 32], bytes: &mut [u8]) {
	for (block_idx, chunk) in bytes.chunks_mut(32).enumerate() {
		let mut hasher = Sha256::new();

		hasher.update(key);
		hasher.update((block_idx as u64).to_be_bytes());

		let block = hasher.finalize();

		for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
			*byte ^= pad;
		}
	}
}
