//! Periodic writer: drains every archive channel's sample buffer into its
//! first storage plugin, and tracks flush latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::registry::ChannelRegistry;
use crate::traits::StoragePlugin;

/// Flush-time bookkeeping. Sum and count are packed as fixed-point
/// milliseconds in `u64`s so they can be updated with plain atomics.
#[derive(Default)]
struct FlushStats {
	sum_millis: AtomicU64,
	count: AtomicU64,
}

impl FlushStats {
	fn record(&self, seconds: f64) {
		let millis = (seconds * 1000.0).round() as u64;
		self.sum_millis.fetch_add(millis, Ordering::Relaxed);
		self.count.fetch_add(1, Ordering::Relaxed);
	}

	fn average_seconds(&self) -> f64 {
		let count = self.count.load(Ordering::Relaxed);
		if count == 0 {
			return 0.0;
		}
		let sum = self.sum_millis.load(Ordering::Relaxed);
		(sum as f64 / count as f64) / 1000.0
	}
}

/// Drains archive channels to storage at a fixed rate. At most one instance
/// runs per engine (SPEC_FULL invariant 4).
pub struct WriterLoop {
	period: Duration,
	started: AtomicBool,
	stats: FlushStats,
	cancel: CancellationToken,
	handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WriterLoop {
	pub fn new() -> Self {
		Self {
			period: Duration::from_secs(0),
			started: AtomicBool::new(false),
			stats: FlushStats::default(),
			cancel: CancellationToken::new(),
			handle: parking_lot::Mutex::new(None),
		}
	}

	pub fn is_write_thread_started(&self) -> bool {
		self.started.load(Ordering::SeqCst)
	}

	pub fn write_period(&self) -> Duration {
		self.period
	}

	pub fn average_seconds_consumed_by_writer(&self) -> f64 {
		self.stats.average_seconds()
	}

	/// Record one flush's elapsed time. Used by the real periodic tick and
	/// by any caller recording a flush time directly (SPEC_FULL §6).
	pub fn record_flush_time(&self, seconds: f64) {
		self.stats.record(seconds);
	}

	/// Adopt the requested period, clamping to a minimum of one second, and
	/// return the actual period used (SPEC_FULL §4.C).
	fn adopt_period(&mut self, requested: Duration) -> Duration {
		let actual = requested.max(Duration::from_secs(1));
		self.period = actual;
		actual
	}
}

impl Default for WriterLoop {
	fn default() -> Self {
		Self::new()
	}
}

/// Starts the writer's periodic task. Scheduled at fixed rate
/// `actual_period`, starting at delay 0.
pub fn start_write_thread(writer: Arc<parking_lot::RwLock<WriterLoop>>, requested_period: Duration, registry: Arc<ChannelRegistry>, storage: Arc<dyn StoragePlugin>) -> Duration {
	let actual_period = {
		let mut guard = writer.write();
		if guard.is_write_thread_started() {
			warn!("start_write_thread called while the writer is already running; ignoring");
			return guard.write_period();
		}
		guard.adopt_period(requested_period)
	};

	let cancel = writer.read().cancel.clone();
	let writer_for_task = writer.clone();
	let task = tokio::spawn(async move {
		let mut interval = tokio::time::interval(actual_period);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = cancel.cancelled() => return,
				_ = interval.tick() => {
					run_one_tick(&writer_for_task, &registry, storage.as_ref()).await;
				}
			}
		}
	});

	let mut guard = writer.write();
	*guard.handle.get_mut() = Some(task);
	guard.started.store(true, Ordering::SeqCst);
	actual_period
}

async fn run_one_tick(writer: &Arc<parking_lot::RwLock<WriterLoop>>, registry: &ChannelRegistry, storage: &dyn StoragePlugin) {
	let start = tokio::time::Instant::now();
	for channel in registry.iter() {
		if let Err(err) = storage.flush(channel.name()).await {
			error!("writer flush failed for channel '{}': {}", channel.name(), err);
		}
	}
	let elapsed = start.elapsed().as_secs_f64();
	writer.read().record_flush_time(elapsed);
}

/// Flush every channel synchronously, for use during shutdown
/// (SPEC_FULL §4.G step 3).
pub async fn flush_synchronously(registry: &ChannelRegistry, storage: &dyn StoragePlugin) {
	for channel in registry.iter() {
		if let Err(err) = storage.flush(channel.name()).await {
			error!("shutdown flush failed for channel '{}': {}", channel.name(), err);
		}
	}
}

/// Stop the writer's periodic task. Idempotent.
pub fn stop(writer: &parking_lot::RwLock<WriterLoop>) {
	let guard = writer.read();
	guard.cancel.cancel();
	guard.started.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::{FakeArchiveChannel, FakeStoragePlugin};
	use std::sync::Arc;

	#[tokio::test]
	async fn start_write_thread_sets_started_and_period() {
		let writer = Arc::new(parking_lot::RwLock::new(WriterLoop::new()));
		let registry = Arc::new(ChannelRegistry::new());
		let storage = Arc::new(FakeStoragePlugin::new());

		let actual = start_write_thread(writer.clone(), Duration::from_secs(5), registry, storage);
		assert_eq!(actual, Duration::from_secs(5));
		assert!(writer.read().is_write_thread_started());
		assert_eq!(writer.read().write_period(), Duration::from_secs(5));
		stop(&writer);
	}

	#[tokio::test]
	async fn average_flush_time_sum_over_count() {
		let writer = WriterLoop::new();
		writer.record_flush_time(0.10);
		writer.record_flush_time(0.30);
		writer.record_flush_time(0.20);
		assert!((writer.average_seconds_consumed_by_writer() - 0.20).abs() < 1e-6);
	}

	#[tokio::test]
	async fn average_flush_time_zero_when_no_recordings() {
		let writer = WriterLoop::new();
		assert_eq!(writer.average_seconds_consumed_by_writer(), 0.0);
	}

	#[tokio::test]
	async fn flush_synchronously_drains_every_channel() {
		let registry = ChannelRegistry::new();
		registry.register(Arc::new(FakeArchiveChannel::new("ROOM:TEMP", 0)));
		let storage = FakeStoragePlugin::new();
		flush_synchronously(&registry, &storage).await;
		assert_eq!(storage.flush_count(), 1);
	}
}
