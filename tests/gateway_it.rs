// self
use session_resilience::{
	_preludet::*,
	auth::{IssuedToken, TokenSource, TokenSourceError, TokenSourceFuture, ValidationState},
	clock::Clock,
	config::GatewayConfig,
	error::ApiErrorKind,
	gateway::{Gateway, HostEnvironment},
	http::{FINGERPRINT_HEADER, Method, REQUEST_ID_HEADER, routes},
	notify::{Notice, Notifier},
	store::{MemoryBackend, StorageBroadcast},
};

#[derive(Default)]
struct Collect(Mutex<Vec<Notice>>);
impl Notifier for Collect {
	fn notify(&self, notice: &Notice) {
		self.0.lock().push(notice.clone());
	}
}

struct Renewing(Arc<dyn Clock>);
impl TokenSource for Renewing {
	fn fetch_token(&self) -> TokenSourceFuture<'_> {
		Box::pin(async move {
			Ok(IssuedToken::new(token_expiring_in(self.0.as_ref(), "user-7", Duration::hours(1))))
		})
	}
}

fn config() -> GatewayConfig {
	GatewayConfig::from_base_str(TEST_API_BASE)
		.expect("Fixture base URL should be valid.")
		.with_storage_namespace("vocab_")
}

fn host(clock: Arc<dyn Clock>) -> HostEnvironment {
	HostEnvironment::default().with_profile(test_device_profile()).with_clock(clock)
}

#[tokio::test]
async fn validated_session_is_attributed_to_the_server_user() {
	let clock = test_clock();
	let transport = ScriptedTransport::default();
	let gateway =
		Gateway::with_transport(config(), Arc::new(transport.clone()), host(clock.clone()));

	assert!(gateway.login(token_expiring_in(clock.as_ref(), "user-7", Duration::hours(1)), None));

	transport.push_json(200, serde_json::json!({ "user": { "id": "user-7" } }));

	assert_eq!(gateway.validate_session().await.ok().as_deref(), Some("user-7"));
	assert_eq!(
		gateway.validator().state(),
		ValidationState::Authenticated { user_id: "user-7".into() }
	);
	assert_eq!(
		gateway.limiter().available_tokens(routes::VALIDATE_PATH, Some("user-7")),
		Some(9)
	);
	assert!(gateway.supervisor().is_running());
}

#[tokio::test(start_paused = true)]
async fn validation_recovered_after_unauthorized_rearms_the_timers() {
	let clock = test_clock();
	let transport = ScriptedTransport::default();
	let gateway = Gateway::with_transport(
		config(),
		Arc::new(transport.clone()),
		host(clock.clone()).with_token_source(Arc::new(Renewing(clock.clone()))),
	);

	gateway.login(token_expiring_in(clock.as_ref(), "user-7", Duration::hours(1)), None);
	transport.push_json(401, serde_json::json!({ "message": "token revoked" }));
	transport.push_json(200, serde_json::json!({ "id": "user-7" }));

	assert_eq!(gateway.validate_session().await.ok().as_deref(), Some("user-7"));
	assert_eq!(transport.request_count(), 2);
	assert!(gateway.session().has_token());
	assert!(gateway.supervisor().is_running());
	assert!(gateway.supervisor().has_timeout());
}

#[tokio::test]
async fn repeated_failures_notify_once_per_cool_down() {
	let clock = test_clock();
	let transport = ScriptedTransport::default();
	let notices = Arc::new(Collect::default());
	let gateway = Gateway::with_transport(
		config(),
		Arc::new(transport.clone()),
		host(clock.clone()).with_notifier(notices.clone()),
	);

	gateway.login(token_expiring_in(clock.as_ref(), "user-7", Duration::hours(1)), None);

	for _ in 0..3 {
		transport.push_json(502, serde_json::json!({}));

		let error = gateway.get("/words").await.expect_err("502 should fail.");

		assert_eq!(error.kind(), ApiErrorKind::Server);
	}

	assert_eq!(notices.0.lock().len(), 1);
	assert_eq!(notices.0.lock()[0].kind, ApiErrorKind::Server);
}

#[tokio::test(start_paused = true)]
async fn teardown_sends_queued_failures_as_a_beacon() {
	let clock = test_clock();
	let transport = ScriptedTransport::default();
	let gateway =
		Gateway::with_transport(config(), Arc::new(transport.clone()), host(clock.clone()));

	gateway.login(token_expiring_in(clock.as_ref(), "user-7", Duration::hours(1)), None);
	transport.push_json(500, serde_json::json!({}));
	gateway.get("/words").await.expect_err("500 should fail.");

	assert_eq!(gateway.batcher().pending_request_count(), 1);
	assert!(gateway.teardown());
	assert!(!gateway.supervisor().is_running());

	tokio::time::sleep(std::time::Duration::from_secs(1)).await;

	let beacon = transport
		.requests()
		.into_iter()
		.find(|request| request.path == routes::METRICS_INGEST_PATH)
		.expect("Beacon should reach the ingest endpoint.");
	let body = beacon.body.clone().expect("Beacon carries the batch.");

	assert_eq!(beacon.method, Method::Post);
	assert!(beacon.header(REQUEST_ID_HEADER).is_some());
	assert!(beacon.header(FINGERPRINT_HEADER).is_some());
	assert_eq!(body["metrics"][0]["name"], "/words");
	assert_eq!(body["metrics"][0]["status"], 500);
}

#[tokio::test]
async fn refresh_without_silent_renewal_keeps_the_current_session() {
	let clock = test_clock();
	let gateway = Gateway::with_transport(
		config(),
		Arc::new(ScriptedTransport::default()),
		host(clock.clone()),
	);

	gateway.login(token_expiring_in(clock.as_ref(), "user-7", Duration::hours(1)), None);

	assert!(matches!(gateway.refresh_session().await, Err(TokenSourceError::LoginRequired)));
	assert!(gateway.session().has_token());
	assert!(gateway.supervisor().is_running());
}

#[tokio::test]
async fn logout_in_one_tab_stops_the_other_tabs_timers() {
	let clock = test_clock();
	let backend = Arc::new(MemoryBackend::default());
	let bus = StorageBroadcast::default();
	let tab = || {
		Gateway::with_transport(
			config(),
			Arc::new(ScriptedTransport::default()),
			host(clock.clone()).with_backend(backend.clone()).with_broadcast(bus.clone()),
		)
	};
	let first = tab();
	let second = tab();

	first.login(token_expiring_in(clock.as_ref(), "user-7", Duration::hours(1)), None);
	second.start();

	assert_eq!(second.session().user_id().as_deref(), Some("user-7"));
	assert!(second.supervisor().is_running());

	first.logout();

	assert!(!second.session().has_token());
	assert!(!second.supervisor().is_running());
}
