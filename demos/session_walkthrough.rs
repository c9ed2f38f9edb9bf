//! Walks a session through login, server-side validation, a retried call, and page teardown
//! against a local mock API, using the default reqwest transport.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use color_eyre::Result;
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
// self
use session_resilience::{
	config::GatewayConfig,
	gateway::{Gateway, HostEnvironment},
	http::ApiRequest,
	store::DeviceProfile,
};

fn demo_token(sub: &str, ttl: Duration) -> String {
	let now = OffsetDateTime::now_utc();
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
	let claims = serde_json::json!({
		"sub": sub,
		"iat": now.unix_timestamp(),
		"exp": (now + ttl).unix_timestamp(),
		"roles": ["learner"],
	});

	format!("{header}.{}.demo", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let validate_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/auth/validate");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"user":{"id":"learner-1"}}"#);
		})
		.await;
	let words_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/words");
			then.status(503).body("");
		})
		.await;
	let config =
		GatewayConfig::from_base_str(&server.url("/api/v1"))?.with_storage_namespace("demo_");
	let host = HostEnvironment::default().with_profile(DeviceProfile::new(
		"demo-agent/1.0",
		"en-US",
		"1280x800x24",
		"https://demo.local",
	));
	let gateway = Gateway::new(config, host)?;

	gateway.start();
	gateway.login(demo_token("learner-1", Duration::hours(1)), None);

	println!("Validated session for {}.", gateway.validate_session().await?);

	match gateway.send_with_retry(ApiRequest::get("/words")).await {
		Ok(response) => println!("Unexpected success with status {}.", response.status),
		Err(e) => println!("Gave up with a {} failure: {e}", e.kind()),
	}

	println!("Beacon handed off on teardown: {}.", gateway.teardown());

	validate_mock.assert_async().await;
	words_mock.assert_calls_async(3).await;

	Ok(())
}
