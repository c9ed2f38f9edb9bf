//! Time sources and owned background tasks.
//!
//! Every component reads wall time through [`Clock`] so tests can pin or advance it, while
//! suspension always goes through `tokio::time`. [`SystemClock`] anchors wall time to the tokio
//! clock, so paused tokio time (`start_paused = true`) is observed consistently by both.

// crates.io
use tokio::{runtime::Handle, task::JoinHandle, time::Instant};
// self
use crate::_prelude::*;

/// Source of the current wall-clock instant.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;
}

/// Wall clock anchored to the tokio clock.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
	wall: OffsetDateTime,
	mono: Instant,
}
impl SystemClock {
	/// Captures the current wall/monotonic pair.
	pub fn new() -> Self {
		Self { wall: OffsetDateTime::now_utc(), mono: Instant::now() }
	}
}
impl Default for SystemClock {
	fn default() -> Self {
		Self::new()
	}
}
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		let elapsed = Instant::now().saturating_duration_since(self.mono);

		self.wall + elapsed
	}
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<OffsetDateTime>);
impl ManualClock {
	/// Creates a clock pinned at `instant`.
	pub fn new(instant: OffsetDateTime) -> Self {
		Self(Mutex::new(instant))
	}

	/// Moves the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		*self.0.lock() += delta;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

/// Converts a (possibly negative) [`Duration`] into a std duration, clamping at zero.
pub fn to_std(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

/// Suspends the caller for `duration` (no-op for zero or negative values).
pub async fn sleep(duration: Duration) {
	let wait = to_std(duration);

	if !wait.is_zero() {
		tokio::time::sleep(wait).await;
	}
}

/// Background task with a single owner; cancelling or dropping it aborts the task.
#[derive(Debug)]
pub struct ScheduledTask {
	label: &'static str,
	handle: JoinHandle<()>,
}
impl ScheduledTask {
	/// Spawns `fut` on the ambient tokio runtime.
	///
	/// Returns `None` (and logs) when no runtime is available, so callers outside a runtime
	/// degrade to "timer disabled" instead of panicking.
	pub fn spawn<F>(label: &'static str, fut: F) -> Option<Self>
	where
		F: 'static + Send + Future<Output = ()>,
	{
		match Handle::try_current() {
			Ok(handle) => Some(Self { label, handle: handle.spawn(fut) }),
			Err(_) => {
				tracing::warn!(task = label, "No tokio runtime available; task not scheduled.");

				None
			},
		}
	}

	/// Returns `true` once the task has completed or been aborted.
	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}

	/// Aborts the task.
	pub fn cancel(self) {
		drop(self);
	}
}
impl Drop for ScheduledTask {
	fn drop(&mut self) {
		if !self.handle.is_finished() {
			tracing::debug!(task = self.label, "Cancelling scheduled task.");
		}

		self.handle.abort();
	}
}

/// Spawns a fire-and-forget task; returns `false` (and logs) when no runtime is available.
pub fn spawn_detached<F>(label: &'static str, fut: F) -> bool
where
	F: 'static + Send + Future<Output = ()>,
{
	match Handle::try_current() {
		Ok(handle) => {
			drop(handle.spawn(fut));

			true
		},
		Err(_) => {
			tracing::warn!(task = label, "No tokio runtime available; task dropped.");

			false
		},
	}
}
