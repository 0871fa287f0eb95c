//! `EngineContext`: the process-wide singleton tying together the command
//! thread pool, channel/controlling-PV registries, writer loop, disconnect
//! monitor, cluster client and event subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use parking_lot::RwLock;

use crate::command_pool::CommandThreadPool;
use crate::config;
use crate::disconnect::DisconnectMonitor;
use crate::error::{EngineError, Result};
use crate::registry::{ChannelRegistry, ControllingPvRegistry};
use crate::traits::{ChannelAccessContext, ClusterMembership, ConfigService, StoragePlugin};
use crate::writer::{self, WriterLoop};

/// Process-wide engine state (SPEC_FULL §3). Created once per process with a
/// reference to the config service; torn down via `shutdown`.
pub struct EngineContext {
	command_threads: CommandThreadPool,
	channels: Arc<ChannelRegistry>,
	controlling_pvs: Arc<ControllingPvRegistry>,
	writer: Arc<RwLock<WriterLoop>>,
	disconnect_monitor: Arc<DisconnectMonitor>,
	config: Arc<dyn ConfigService>,
	main_scheduler_installed: AtomicBool,
	sample_buffer_capacity_adjustment: f64,
}

impl EngineContext {
	/// Construct the command-thread pool (sized from
	/// `commandThreadCount`, default 10) and wait for its startup barrier.
	pub fn new(config: Arc<dyn ConfigService>, context_factory: Arc<dyn Fn() -> Arc<dyn ChannelAccessContext> + Send + Sync>) -> Self {
		let thread_count = config::command_thread_count(config.as_ref());
		let command_threads = CommandThreadPool::new(thread_count, context_factory);
		let disconnect_timeout = config::disconnect_check_timeout(config.as_ref());
		let sample_buffer_capacity_adjustment = config::sample_buffer_capacity_adjustment(config.as_ref());

		Self {
			command_threads,
			channels: Arc::new(ChannelRegistry::new()),
			controlling_pvs: Arc::new(ControllingPvRegistry::new()),
			writer: Arc::new(RwLock::new(WriterLoop::new())),
			disconnect_monitor: Arc::new(DisconnectMonitor::new(disconnect_timeout)),
			config,
			main_scheduler_installed: AtomicBool::new(false),
			sample_buffer_capacity_adjustment,
		}
	}

	pub fn channel_registry(&self) -> &Arc<ChannelRegistry> {
		&self.channels
	}

	pub fn controlling_pv_registry(&self) -> &Arc<ControllingPvRegistry> {
		&self.controlling_pvs
	}

	pub fn sample_buffer_capacity_adjustment(&self) -> f64 {
		self.sample_buffer_capacity_adjustment
	}

	/// Stable hashing over the base name, reusing an already-registered
	/// channel's thread id (SPEC_FULL §4.A).
	pub fn assign_command_thread(&self, pv_name: &str) -> usize {
		self.command_threads.assign_command_thread(pv_name, &self.channels)
	}

	pub fn get_command_thread_ready(&self, index: usize) -> Result<bool> {
		self.command_threads.get_command_thread(index).map(|t| t.is_ready()).ok_or(EngineError::NoSuchCommandThread(index, self.command_threads.thread_count()))
	}

	pub fn does_context_match_thread(&self, ctx: &Arc<dyn ChannelAccessContext>, index: usize) -> bool {
		self.command_threads.does_context_match_thread(ctx, index)
	}

	pub fn is_main_scheduler_installed(&self) -> bool {
		self.main_scheduler_installed.load(Ordering::SeqCst)
	}

	/// Test-only: base names of registered channels matching `pv_name`'s
	/// base name (SPEC_FULL §6).
	pub fn native_channels_for(&self, pv_name: &str) -> Vec<String> {
		self.channels.channels_matching_base_name(pv_name)
	}

	/// May be installed only once; a second attempt is a no-op logged as an
	/// error (SPEC_FULL invariant 6).
	pub fn install_main_scheduler(&self) -> Result<()> {
		if self.main_scheduler_installed.swap(true, Ordering::SeqCst) {
			error!("a main scheduler is already installed; ignoring second attempt");
			return Err(EngineError::SchedulerAlreadyInstalled);
		}
		Ok(())
	}

	/// Start the writer at the configured period. Computes the default
	/// period from `secondsToBuffer`, lets the writer adopt (and possibly
	/// clamp) it, and stores the actual period.
	pub fn start_write_thread(&self, seconds_to_buffer: u64, storage: Arc<dyn StoragePlugin>) -> Result<Duration> {
		let _ = self.install_main_scheduler();
		let requested = Duration::from_secs(seconds_to_buffer);
		let actual = writer::start_write_thread(self.writer.clone(), requested, self.channels.clone(), storage);
		Ok(actual)
	}

	pub fn is_write_thread_started(&self) -> bool {
		self.writer.read().is_write_thread_started()
	}

	pub fn write_period(&self) -> Duration {
		self.writer.read().write_period()
	}

	pub fn average_seconds_consumed_by_writer(&self) -> f64 {
		self.writer.read().average_seconds_consumed_by_writer()
	}

	/// Record one flush's elapsed time (SPEC_FULL §6). The real periodic
	/// tick (`writer::run_one_tick`) records through the same path.
	pub fn record_writer_flush_time(&self, seconds: f64) {
		self.writer.read().record_flush_time(seconds);
	}

	/// Start the disconnect monitor on its own scheduler, independent of the
	/// main scheduler (SPEC_FULL §4.D, §5).
	pub fn start_disconnect_monitor(&self, cluster: Arc<dyn ClusterMembership>) {
		self.disconnect_monitor.spawn(self.config.clone(), self.channels.clone(), cluster);
	}

	/// Test-only: reconfigure the disconnect monitor's timeout/period.
	pub fn for_testing_only_set_disconnect_timeout(&self, value: Duration, cluster: Arc<dyn ClusterMembership>) {
		self.disconnect_monitor.for_testing_only_reconfigure(value, self.config.clone(), self.channels.clone(), cluster);
	}

	/// Ordered, best-effort teardown (SPEC_FULL §4.G). Each step is
	/// independently guarded so one failure cannot block later steps.
	pub async fn shutdown(&self, storage: &dyn StoragePlugin) {
		writer::stop(&self.writer);

		for channel in self.channels.iter() {
			channel.shutdown_meta_channels();
			channel.stop();
		}

		writer::flush_synchronously(&self.channels, storage).await;

		self.channels.clear();
		self.controlling_pvs.stop_all();

		self.main_scheduler_installed.store(false, Ordering::SeqCst);
		self.command_threads.shutdown();

		info!("engine context shutdown complete");
	}

	/// Separate shutdown hook: interrupts in-flight disconnect ticks
	/// (SPEC_FULL §4.G).
	pub fn shutdown_disconnect_monitor_now(&self) {
		self.disconnect_monitor.shutdown_now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::{FakeArchiveChannel, FakeChannelAccessContext, FakeStoragePlugin, InMemoryConfigService, StubPeerCountSource};
	use std::sync::Arc;

	fn context_factory() -> Arc<dyn Fn() -> Arc<dyn ChannelAccessContext> + Send + Sync> {
		Arc::new(|| Arc::new(FakeChannelAccessContext::new()) as Arc<dyn ChannelAccessContext>)
	}

	#[tokio::test]
	async fn shutdown_clears_registry() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());

		for i in 0..100 {
			engine.channel_registry().register(Arc::new(FakeArchiveChannel::new(&format!("test_{}", i), 0)));
		}
		assert_eq!(engine.channel_registry().len(), 100);

		let storage = FakeStoragePlugin::new();
		engine.shutdown(&storage).await;
		assert_eq!(engine.channel_registry().len(), 0);
		assert!(!engine.is_write_thread_started());
	}

	#[tokio::test]
	async fn start_write_thread_marks_started() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());
		let storage = Arc::new(FakeStoragePlugin::new());

		let period = engine.start_write_thread(5, storage).unwrap();
		assert!(period.as_secs() > 0);
		assert!(engine.is_write_thread_started());
	}

	#[tokio::test]
	async fn installing_main_scheduler_twice_is_a_logged_no_op() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());
		assert!(engine.install_main_scheduler().is_ok());
		assert!(engine.install_main_scheduler().is_err());
	}

	#[tokio::test]
	async fn assign_command_thread_is_stable() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());

		let first = engine.assign_command_thread("ROOM:TEMP");
		engine.channel_registry().register(Arc::new(FakeArchiveChannel::new("ROOM:TEMP", first)));
		let second = engine.assign_command_thread("ROOM:TEMP.VAL");
		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn record_writer_flush_time_feeds_the_average() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());

		engine.record_writer_flush_time(0.10);
		engine.record_writer_flush_time(0.30);
		engine.record_writer_flush_time(0.20);
		assert!((engine.average_seconds_consumed_by_writer() - 0.20).abs() < 1e-6);
	}

	#[tokio::test]
	async fn native_channels_for_matches_on_base_name() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());
		engine.channel_registry().register(Arc::new(FakeArchiveChannel::new("ROOM:TEMP", 0)));

		assert_eq!(engine.native_channels_for("ROOM:TEMP.VAL"), vec!["ROOM:TEMP".to_string()]);
		assert!(!engine.is_main_scheduler_installed());
	}

	#[tokio::test]
	async fn disconnect_monitor_can_be_started_and_stopped() {
		let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
		let engine = EngineContext::new(config, context_factory());
		let cluster: Arc<dyn ClusterMembership> = Arc::new(StubPeerCountSource::empty());
		engine.start_disconnect_monitor(cluster);
		engine.shutdown_disconnect_monitor_now();
	}
}
