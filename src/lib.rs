//! Client session and API-resilience layer: obfuscated token persistence, per-endpoint token
//! buckets, an interceptor pipeline that classifies and recovers from transport failures, and a
//! telemetry batcher that never stands in the user's way.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod notify;
pub mod obs;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod telemetry;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::collections::VecDeque;
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use crate::{
		clock::{Clock, ManualClock},
		http::{ApiRequest, ApiResponse, ApiTransport, TransportFailure, TransportFuture},
		store::{DeviceProfile, MemoryBackend, ObfuscatedStore, StorageBroadcast},
		telemetry::{MetricBatch, MetricsSink, SinkFuture},
	};

	/// Base URL used by the scripted transport fixtures.
	pub const TEST_API_BASE: &str = "https://api.test/api/v1/";

	/// Device profile fixture with every signal populated.
	pub fn test_device_profile() -> DeviceProfile {
		DeviceProfile::new("test-agent/1.0", "en-US", "1920x1080x24", "https://app.test")
	}

	/// Builds an obfuscated store over a fresh in-memory backend.
	pub fn test_obfuscated_store() -> Arc<ObfuscatedStore> {
		Arc::new(ObfuscatedStore::new(
			Arc::new(MemoryBackend::default()),
			test_device_profile(),
			StorageBroadcast::default(),
		))
	}

	/// Manual clock pinned to a fixed instant.
	pub fn test_clock() -> Arc<ManualClock> {
		Arc::new(ManualClock::new(time::macros::datetime!(2025-06-01 12:00 UTC)))
	}

	/// Encodes an unsigned JWT-shaped bearer token carrying the provided claims.
	pub fn encode_test_token(claims: serde_json::Value) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

		format!("{header}.{payload}.signature")
	}

	/// Encodes a token for `sub` that expires `ttl` after the clock's current instant.
	pub fn token_expiring_in(clock: &dyn Clock, sub: &str, ttl: Duration) -> String {
		let now = clock.now();

		encode_test_token(serde_json::json!({
			"sub": sub,
			"exp": (now + ttl).unix_timestamp(),
			"iat": now.unix_timestamp(),
			"iss": "https://id.test/",
			"aud": "vocab-api",
			"roles": ["learner"],
			"permissions": ["read:words"],
		}))
	}

	/// Scripted transport that replays queued outcomes and records every request it sees.
	#[derive(Clone, Default)]
	pub struct ScriptedTransport {
		outcomes: Arc<Mutex<VecDeque<Result<ApiResponse, TransportFailure>>>>,
		requests: Arc<Mutex<Vec<ApiRequest>>>,
		latency: Arc<Mutex<Option<(Arc<ManualClock>, Duration)>>>,
	}
	impl ScriptedTransport {
		/// Advances `clock` by `latency` during every subsequent call.
		pub fn set_latency(&self, clock: Arc<ManualClock>, latency: Duration) {
			*self.latency.lock() = Some((clock, latency));
		}

		/// Queues a response with the provided status and JSON body.
		pub fn push_json(&self, status: u16, body: serde_json::Value) {
			self.outcomes.lock().push_back(Ok(ApiResponse::new(status, body.to_string())));
		}

		/// Queues a prebuilt response.
		pub fn push_response(&self, response: ApiResponse) {
			self.outcomes.lock().push_back(Ok(response));
		}

		/// Queues a transport failure (no response received).
		pub fn push_failure(&self, failure: TransportFailure) {
			self.outcomes.lock().push_back(Err(failure));
		}

		/// Returns every request dispatched so far.
		pub fn requests(&self) -> Vec<ApiRequest> {
			self.requests.lock().clone()
		}

		/// Number of requests dispatched so far.
		pub fn request_count(&self) -> usize {
			self.requests.lock().len()
		}
	}
	impl ApiTransport for ScriptedTransport {
		fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				self.requests.lock().push(request);

				if let Some((clock, latency)) = &*self.latency.lock() {
					clock.advance(*latency);
				}

				self.outcomes
					.lock()
					.pop_front()
					.unwrap_or_else(|| Ok(ApiResponse::new(200, "{}")))
			})
		}
	}

	/// Metrics sink that records batches and can be told to fail.
	#[derive(Clone, Default)]
	pub struct RecordingSink {
		batches: Arc<Mutex<Vec<MetricBatch>>>,
		beacons: Arc<Mutex<Vec<MetricBatch>>>,
		failing: Arc<Mutex<bool>>,
	}
	impl RecordingSink {
		/// Makes subsequent sends fail (or succeed again).
		pub fn set_failing(&self, failing: bool) {
			*self.failing.lock() = failing;
		}

		/// Batches delivered through the async send path.
		pub fn batches(&self) -> Vec<MetricBatch> {
			self.batches.lock().clone()
		}

		/// Batches delivered through the beacon path.
		pub fn beacons(&self) -> Vec<MetricBatch> {
			self.beacons.lock().clone()
		}
	}
	impl MetricsSink for RecordingSink {
		fn send(&self, batch: MetricBatch) -> SinkFuture<'_> {
			Box::pin(async move {
				if *self.failing.lock() {
					return Err(TransportFailure::network("sink offline").into());
				}

				self.batches.lock().push(batch);

				Ok(())
			})
		}

		fn send_beacon(&self, batch: MetricBatch) -> bool {
			self.beacons.lock().push(batch);

			true
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
