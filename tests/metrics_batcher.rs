// self
use session_resilience::{
	_preludet::*,
	clock::{Clock, ManualClock},
	config::BatcherConfig,
	telemetry::{MetricEvent, MetricsBatcher, Visibility},
};

fn batcher_with(config: BatcherConfig) -> (Arc<ManualClock>, RecordingSink, MetricsBatcher) {
	let clock = test_clock();
	let sink = RecordingSink::default();
	let batcher = MetricsBatcher::new(config, Arc::new(sink.clone()), clock.clone());

	(clock, sink, batcher)
}

fn failed_get(url: &str, at: OffsetDateTime) -> MetricEvent {
	MetricEvent::request("GET", url, Some(500), Duration::milliseconds(40), at)
		.with_error("Internal Server Error")
}

async fn run_timers_for(secs: u64) {
	tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
}

#[tokio::test]
async fn identical_requests_within_the_window_are_queued_once() {
	let (clock, _sink, batcher) = batcher_with(BatcherConfig::default());
	let now = clock.now();

	assert!(batcher.track_request(failed_get("/words", now)));

	clock.advance(Duration::milliseconds(1_500));

	assert!(!batcher.track_request(failed_get("/words", clock.now())));
	assert!(batcher.track_request(
		MetricEvent::request("POST", "/words", Some(500), Duration::ZERO, clock.now())
	));
	assert_eq!(batcher.pending_request_count(), 2);
}

#[tokio::test]
async fn identical_requests_outside_the_window_are_both_queued() {
	let (clock, _sink, batcher) = batcher_with(BatcherConfig::default());

	assert!(batcher.track_request(failed_get("/words", clock.now())));

	clock.advance(Duration::seconds(3));

	assert!(batcher.track_request(failed_get("/words", clock.now())));
	assert_eq!(batcher.pending_request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reaching_the_queue_bound_sends_immediately() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	for idx in 0..50 {
		batcher.track_request(failed_get(&format!("/words/{idx}"), clock.now()));
	}

	assert!(batcher.pending_request_count() < 50);
	assert!(!batcher.has_pending_send());

	run_timers_for(1).await;

	let batches = sink.batches();

	assert_eq!(batches.len(), 1);
	assert_eq!(batches[0].len(), 50);
}

#[tokio::test(start_paused = true)]
async fn sends_are_spaced_by_the_minimum_interval() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	batcher.track_request(failed_get("/words/1", clock.now()));
	run_timers_for(1).await;

	assert_eq!(sink.batches().len(), 1);

	batcher.track_request(failed_get("/words/2", clock.now()));
	batcher.track_request(failed_get("/words/3", clock.now()));

	assert!(batcher.has_pending_send());

	run_timers_for(10).await;

	assert_eq!(sink.batches().len(), 1);
	assert_eq!(batcher.pending_request_count(), 2);

	run_timers_for(25).await;

	let batches = sink.batches();

	assert_eq!(batches.len(), 2);
	assert_eq!(batches[1].len(), 2);
	assert!(!batcher.has_pending_send());
}

#[tokio::test(start_paused = true)]
async fn failed_request_batches_are_dropped() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	sink.set_failing(true);
	batcher.track_request(failed_get("/words", clock.now()));
	run_timers_for(1).await;

	assert!(sink.batches().is_empty());
	assert_eq!(batcher.pending_request_count(), 0);
}

#[tokio::test]
async fn failed_auth_events_are_requeued_ahead_of_newer_ones() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	sink.set_failing(true);
	batcher.track_auth_event(MetricEvent::auth("login", true, clock.now()));
	batcher.track_auth_event(MetricEvent::auth("token_used", true, clock.now()));
	batcher.flush_auth().await;

	assert_eq!(batcher.pending_auth_count(), 2);

	batcher.track_auth_event(MetricEvent::auth("logout", true, clock.now()));
	sink.set_failing(false);
	batcher.flush_auth().await;

	let batches = sink.batches();
	let names: Vec<_> = batches[0].metrics.iter().map(|event| event.name.as_str()).collect();

	assert_eq!(names, ["login", "token_used", "logout"]);
	assert_eq!(batcher.pending_auth_count(), 0);
}

#[tokio::test]
async fn auth_events_are_requeued_at_most_once() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	sink.set_failing(true);
	batcher.track_auth_event(MetricEvent::auth("login", true, clock.now()));
	batcher.flush_auth().await;
	batcher.track_auth_event(MetricEvent::auth("token_used", true, clock.now()));
	batcher.flush_auth().await;

	assert_eq!(batcher.pending_auth_count(), 1);

	sink.set_failing(false);
	batcher.flush_auth().await;

	assert_eq!(sink.batches()[0].metrics[0].name, "token_used");
}

#[tokio::test(start_paused = true)]
async fn auth_queue_flushes_on_size_and_period() {
	let config = BatcherConfig { auth_batch_size: 3, ..Default::default() };
	let (clock, sink, batcher) = batcher_with(config);

	for name in ["login", "token_used", "token_used"] {
		batcher.track_auth_event(MetricEvent::auth(name, true, clock.now()));
	}

	run_timers_for(1).await;

	assert_eq!(sink.batches().len(), 1);

	batcher.start();
	batcher.track_auth_event(MetricEvent::auth("logout", true, clock.now()));
	run_timers_for(61).await;

	assert_eq!(sink.batches().len(), 2);

	batcher.shutdown();
}

#[tokio::test]
async fn unload_hands_queued_requests_to_the_beacon() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	assert!(!batcher.flush_on_unload());

	batcher.track_request(failed_get("/words/1", clock.now()));
	batcher.track_request(failed_get("/words/2", clock.now()));

	assert!(batcher.flush_on_unload());
	assert_eq!(sink.beacons()[0].len(), 2);
	assert_eq!(batcher.pending_request_count(), 0);
	assert!(!batcher.has_pending_send());
}

#[tokio::test]
async fn background_pages_only_record_failures() {
	let (clock, _sink, batcher) = batcher_with(BatcherConfig::default());
	let ok = MetricEvent::request("GET", "/words", Some(200), Duration::seconds(2), clock.now());

	batcher.set_visibility(Visibility::Background);

	assert!(!batcher.track_request(ok.clone()));
	assert!(batcher.track_request(failed_get("/lists", clock.now())));

	batcher.set_visibility(Visibility::Foreground);

	assert!(batcher.track_request(ok));
}

#[tokio::test]
async fn batches_serialize_to_the_ingest_shape() {
	let (clock, sink, batcher) = batcher_with(BatcherConfig::default());

	batcher.track_request(failed_get("/words", clock.now()).with_tag("kind", "server"));
	batcher.flush_requests().await;

	let body = serde_json::to_value(&sink.batches()[0]).expect("Batch should serialize.");

	assert!(body["batchId"].as_str().is_some_and(|id| id.starts_with("batch_")));
	assert_eq!(body["metrics"][0]["type"], "api");
	assert_eq!(body["metrics"][0]["method"], "GET");
	assert_eq!(body["metrics"][0]["status"], 500);
	assert_eq!(body["metrics"][0]["success"], false);
	assert_eq!(body["metrics"][0]["timestamp"], "2025-06-01T12:00:00Z");
}
