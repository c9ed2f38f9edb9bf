//! Two-queue telemetry batcher.
//!
//! The auth queue flushes on a fixed period or once it reaches the batch size, and re-queues a
//! failed batch ahead of newer events (each event at most once). The request queue deduplicates
//! `METHOD url` pairs, sends at most once per minimum interval through a single pending timer,
//! forces a send at its size bound, and drops batches the sink rejects.
//!
//! Queues are drained synchronously; only the sink call is spawned.

// std
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	clock::{self, Clock, ScheduledTask},
	config::BatcherConfig,
	http::routes,
	obs::{self, OpKind, OpOutcome, OpSpan},
	telemetry::{MetricBatch, MetricEvent, MetricsSink},
};

/// Whether the host page is in the foreground.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
	/// Visible; every event is recorded.
	Foreground,
	/// Hidden; only failed request events are recorded.
	Background,
}

/// Telemetry batcher. Clones share the same queues.
#[derive(Clone)]
pub struct MetricsBatcher {
	state: Arc<BatcherState>,
}
impl MetricsBatcher {
	/// Creates a batcher; call [`MetricsBatcher::start`] to arm the auth flush timer.
	pub fn new(config: BatcherConfig, sink: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>) -> Self {
		Self {
			state: Arc::new(BatcherState {
				config,
				sink,
				clock,
				auth: Default::default(),
				requests: Default::default(),
				background: AtomicBool::new(false),
				user_id: Default::default(),
				last_request_send: Default::default(),
				pending_send: Default::default(),
				flush_task: Default::default(),
				generation: AtomicU64::new(0),
			}),
		}
	}

	/// Arms the periodic auth flush. Calling it again replaces the running timer.
	pub fn start(&self) {
		let period = self.state.config.auth_flush_interval();

		if !period.is_positive() {
			tracing::warn!("Auth flush interval is not positive; periodic flush disabled.");

			return;
		}

		let weak = Arc::downgrade(&self.state);
		let task = ScheduledTask::spawn("metrics_auth_flush", async move {
			loop {
				clock::sleep(period).await;

				let Some(state) = weak.upgrade() else { break };

				state.flush_auth().await;
			}
		});

		*self.state.flush_task.lock() = task;
	}

	/// Stops every timer. Queued events stay queued.
	pub fn shutdown(&self) {
		self.state.flush_task.lock().take();
		self.state.pending_send.lock().take();
	}

	/// Queues an auth event, flushing once the batch size is reached.
	pub fn track_auth_event(&self, event: MetricEvent) {
		let event = self.state.attribute(event);
		let len = {
			let mut auth = self.state.auth.lock();

			auth.push(QueuedEvent { event, requeued: false });

			auth.len()
		};

		if len >= self.state.config.auth_batch_size.max(1) {
			let state = self.state.clone();

			clock::spawn_detached("metrics_auth_flush", async move { state.flush_auth().await });
		}
	}

	/// Queues a request event. Returns `false` when the event was excluded, filtered by
	/// visibility, or deduplicated.
	pub fn track_request(&self, event: MetricEvent) -> bool {
		let state = &self.state;

		if state.is_excluded(&event.name) {
			return false;
		}
		if state.background.load(Ordering::Relaxed) && event.success {
			return false;
		}

		let event = state.attribute(event);
		let now = state.clock.now();
		let window = state.config.dedup_window();
		let full = {
			let mut requests = state.requests.lock();
			let key = event.dedup_key();

			requests.recent.retain(|_, queued_at| now - *queued_at < window);

			if requests.recent.contains_key(&key) {
				tracing::trace!(key, "Duplicate request event dropped.");

				return false;
			}

			requests.recent.insert(key, now);
			requests.events.push(event);

			requests.events.len() >= state.config.request_max_queue.max(1)
		};

		if full {
			state.send_requests_now();
		} else {
			state.schedule_request_send();
		}

		true
	}

	/// Sends queued request events through the sink's beacon path, bypassing the throttle.
	///
	/// Returns `true` when a batch was handed off.
	pub fn flush_on_unload(&self) -> bool {
		self.state.pending_send.lock().take();

		let Some(batch) = self.state.drain_requests() else {
			return false;
		};
		let count = batch.len();
		let accepted = self.state.sink.send_beacon(batch);

		if !accepted {
			tracing::warn!(count, "Unload beacon refused; request events dropped.");
		}

		accepted
	}

	/// Flushes the auth queue now.
	pub async fn flush_auth(&self) {
		self.state.flush_auth().await;
	}

	/// Sends the request queue now, ignoring the throttle.
	pub async fn flush_requests(&self) {
		self.state.pending_send.lock().take();

		if let Some(batch) = self.state.drain_requests() {
			self.state.deliver_requests(batch).await;
		}
	}

	/// Empties both queues and the dedup memory, and cancels the pending send.
	///
	/// Auth events from a send already in flight are not re-queued afterwards.
	pub fn clear_cache(&self) {
		self.state.generation.fetch_add(1, Ordering::SeqCst);
		self.state.auth.lock().clear();

		{
			let mut requests = self.state.requests.lock();

			requests.events.clear();
			requests.recent.clear();
		}

		self.state.pending_send.lock().take();
		*self.state.last_request_send.lock() = None;
	}

	/// Switches between foreground and background recording.
	pub fn set_visibility(&self, visibility: Visibility) {
		self.state.background.store(visibility == Visibility::Background, Ordering::Relaxed);
	}

	/// Attributes subsequent events without a user id to `user_id`.
	pub fn set_user_id(&self, user_id: Option<String>) {
		*self.state.user_id.write() = user_id;
	}

	/// Auth events waiting for the next flush.
	pub fn pending_auth_count(&self) -> usize {
		self.state.auth.lock().len()
	}

	/// Request events waiting for the next send.
	pub fn pending_request_count(&self) -> usize {
		self.state.requests.lock().events.len()
	}

	/// Returns `true` while a throttled send is scheduled.
	pub fn has_pending_send(&self) -> bool {
		self.state.pending_send.lock().as_ref().is_some_and(|task| !task.is_finished())
	}
}
impl Debug for MetricsBatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MetricsBatcher")
			.field("pending_auth", &self.pending_auth_count())
			.field("pending_requests", &self.pending_request_count())
			.finish()
	}
}

#[derive(Debug)]
struct QueuedEvent {
	event: MetricEvent,
	requeued: bool,
}

#[derive(Debug, Default)]
struct RequestQueue {
	events: Vec<MetricEvent>,
	recent: HashMap<String, OffsetDateTime>,
}

struct BatcherState {
	config: BatcherConfig,
	sink: Arc<dyn MetricsSink>,
	clock: Arc<dyn Clock>,
	auth: Mutex<Vec<QueuedEvent>>,
	requests: Mutex<RequestQueue>,
	background: AtomicBool,
	user_id: RwLock<Option<String>>,
	last_request_send: Mutex<Option<OffsetDateTime>>,
	pending_send: Mutex<Option<ScheduledTask>>,
	flush_task: Mutex<Option<ScheduledTask>>,
	generation: AtomicU64,
}
impl BatcherState {
	fn attribute(&self, mut event: MetricEvent) -> MetricEvent {
		if event.user_id.is_none() {
			event.user_id = self.user_id.read().clone();
		}

		event
	}

	fn is_excluded(&self, url: &str) -> bool {
		let path = routes::normalize(url);

		routes::is_reporting_excluded(&path)
			|| self.config.excluded_endpoints.iter().any(|excluded| {
				let excluded = routes::normalize(excluded);

				path == excluded || path.starts_with(&format!("{excluded}/"))
			})
	}

	async fn flush_auth(&self) {
		let generation = self.generation.load(Ordering::SeqCst);
		let queued = std::mem::take(&mut *self.auth.lock());

		if queued.is_empty() {
			return;
		}

		let span = OpSpan::new(OpKind::MetricsFlush, "auth_queue");
		let (events, requeued): (Vec<_>, Vec<_>) =
			queued.into_iter().map(|queued| (queued.event, queued.requeued)).unzip();
		let batch = MetricBatch::new(events, self.clock.now());

		obs::record_op_outcome(OpKind::MetricsFlush, OpOutcome::Attempt);

		match span.instrument(self.sink.send(batch.clone())).await {
			Ok(()) => obs::record_op_outcome(OpKind::MetricsFlush, OpOutcome::Success),
			Err(e) => {
				obs::record_op_outcome(OpKind::MetricsFlush, OpOutcome::Failure);

				if generation != self.generation.load(Ordering::SeqCst) {
					tracing::warn!(error = %e, "Auth metrics send failed after cache clear.");

					return;
				}

				let retry = batch
					.metrics
					.into_iter()
					.zip(requeued)
					.filter(|(_, requeued)| !requeued)
					.map(|(event, _)| QueuedEvent { event, requeued: true })
					.collect::<Vec<_>>();

				tracing::warn!(
					error = %e,
					requeued = retry.len(),
					"Auth metrics send failed; re-queueing."
				);

				let mut auth = self.auth.lock();
				let newer = std::mem::replace(&mut *auth, retry);

				auth.extend(newer);
			},
		}
	}

	fn drain_requests(&self) -> Option<MetricBatch> {
		let events = std::mem::take(&mut self.requests.lock().events);

		if events.is_empty() {
			return None;
		}

		let now = self.clock.now();

		*self.last_request_send.lock() = Some(now);

		Some(MetricBatch::new(events, now))
	}

	fn send_requests_now(self: &Arc<Self>) {
		self.pending_send.lock().take();

		if let Some(batch) = self.drain_requests() {
			self.spawn_delivery(batch);
		}
	}

	fn schedule_request_send(self: &Arc<Self>) {
		let mut pending = self.pending_send.lock();

		if pending.as_ref().is_some_and(|task| !task.is_finished()) {
			return;
		}

		let wait = match *self.last_request_send.lock() {
			Some(last) => last + self.config.min_send_interval() - self.clock.now(),
			None => Duration::ZERO,
		};
		let weak = Arc::downgrade(self);

		*pending = ScheduledTask::spawn("metrics_request_send", async move {
			clock::sleep(wait).await;

			if let Some(state) = weak.upgrade()
				&& let Some(batch) = state.drain_requests()
			{
				state.spawn_delivery(batch);
			}
		});
	}

	fn spawn_delivery(self: &Arc<Self>, batch: MetricBatch) {
		let state = self.clone();
		let count = batch.len();

		if !clock::spawn_detached("metrics_request_delivery", async move {
			state.deliver_requests(batch).await
		}) {
			tracing::warn!(count, "Request metrics dropped without a runtime.");
		}
	}

	async fn deliver_requests(&self, batch: MetricBatch) {
		let span = OpSpan::new(OpKind::MetricsFlush, "request_queue");
		let count = batch.len();

		obs::record_op_outcome(OpKind::MetricsFlush, OpOutcome::Attempt);

		match span.instrument(self.sink.send(batch)).await {
			Ok(()) => obs::record_op_outcome(OpKind::MetricsFlush, OpOutcome::Success),
			Err(e) => {
				obs::record_op_outcome(OpKind::MetricsFlush, OpOutcome::Failure);
				tracing::warn!(error = %e, count, "Request metrics send failed; batch dropped.");
			},
		}
	}
}
