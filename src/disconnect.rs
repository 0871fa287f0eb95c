//! Disconnect/reconnect monitor: a dedicated periodic task that repairs
//! stuck channels and stages metachannel startup once the cluster is mostly
//! connected.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::ChannelRegistry;
use crate::traits::{ArchiveChannel, ClusterMembership, ConfigService};

/// Metachannel-startup gating threshold, percent.
pub const GATING_THRESHOLD_PERCENT: f64 = 5.0;
/// At most this many metachannels are started per tick.
pub const METACHANNELS_TO_START_AT_A_TIME: usize = 10_000;
/// Not read from any property; the test-only reconfigure setter is the only
/// way to change it (see SPEC_FULL §9 open questions).
pub const DEFAULT_CHECKER_PERIOD: Duration = Duration::from_secs(20 * 60);
const PAUSE_RESUME_SLEEP: Duration = Duration::from_secs(1);

struct Settings {
	timeout: Duration,
	period: Duration,
}

/// Runs on a dedicated single-thread scheduler, separate from the writer's,
/// so writer load cannot starve connectivity repair.
pub struct DisconnectMonitor {
	settings: RwLock<Settings>,
	cancel: CancellationToken,
	handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DisconnectMonitor {
	pub fn new(timeout: Duration) -> Self {
		Self {
			settings: RwLock::new(Settings { timeout, period: DEFAULT_CHECKER_PERIOD }),
			cancel: CancellationToken::new(),
			handle: parking_lot::Mutex::new(None),
		}
	}

	pub fn timeout(&self) -> Duration {
		self.settings.read().timeout
	}

	pub fn period(&self) -> Duration {
		self.settings.read().period
	}

	/// Test-only: cancel the outstanding future, apply `value` to both the
	/// timeout and the period, and reschedule.
	pub fn for_testing_only_reconfigure(self: &Arc<Self>, value: Duration, config: Arc<dyn ConfigService>, registry: Arc<ChannelRegistry>, cluster: Arc<dyn ClusterMembership>) {
		{
			let mut settings = self.settings.write();
			settings.timeout = value;
			settings.period = value;
		}
		if let Some(old) = self.handle.lock().take() {
			old.abort();
		}
		self.spawn(config, registry, cluster);
	}

	/// Start the periodic task: fixed rate of `period`, first fire after the
	/// same delay. At most one instance runs at a time (SPEC_FULL invariant
	/// 5); a second call while one is already running is a logged no-op.
	pub fn spawn(self: &Arc<Self>, config: Arc<dyn ConfigService>, registry: Arc<ChannelRegistry>, cluster: Arc<dyn ClusterMembership>) {
		if self.handle.lock().is_some() {
			warn!("disconnect monitor is already running; ignoring second spawn");
			return;
		}

		let monitor = self.clone();
		let cancel = self.cancel.clone();
		let period = self.period();
		let task = tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			loop {
				tokio::select! {
					_ = cancel.cancelled() => return,
					_ = interval.tick() => {
						monitor.run_one_tick(config.as_ref(), &registry, cluster.as_ref()).await;
					}
				}
			}
		});
		*self.handle.lock() = Some(task);
	}

	async fn run_one_tick(&self, config: &dyn ConfigService, registry: &ChannelRegistry, cluster: &dyn ClusterMembership) {
		if config.is_shutting_down() {
			return;
		}

		let timeout_secs = self.timeout().as_secs_f64();
		let channels = registry.iter();
		let total = channels.len();

		let mut disconnected_stuck = Vec::new();
		let mut needs_meta = Vec::new();

		for channel in &channels {
			if !channel.is_connected() {
				if timeout_secs > 0.0 && channel.seconds_elapsed_since_search_request() > timeout_secs {
					disconnected_stuck.push(channel.clone());
				} else {
					info!("channel '{}' is disconnected but has not exceeded the stuck timeout", channel.name());
				}
			} else if channel.meta_channels_need_starting_up() {
				needs_meta.push(channel.clone());
			}
		}

		for channel in &disconnected_stuck {
			self.repair_one(config, channel.as_ref()).await;
		}

		self.maybe_start_metachannels(config, cluster, total, disconnected_stuck.len(), &needs_meta).await;
	}

	async fn repair_one(&self, config: &dyn ConfigService, channel: &dyn ArchiveChannel) {
		let type_info = match config.type_info(channel.name()) {
			Some(info) => info,
			None => return,
		};
		if type_info.is_paused {
			return;
		}
		channel.stop();
		tokio::time::sleep(PAUSE_RESUME_SLEEP).await;
		if channel.is_connected() {
			warn!("channel '{}' still reports native channels after pause; resuming anyway", channel.name());
		}
		info!("resumed archiving for stuck channel '{}'", channel.name());
	}

	async fn maybe_start_metachannels(&self, config: &dyn ConfigService, cluster: &dyn ClusterMembership, total: usize, disconnected_stuck_count: usize, needs_meta: &[Arc<dyn ArchiveChannel>]) {
		if total == 0 {
			return;
		}
		let local_percent = disconnected_stuck_count as f64 * 100.0 / total as f64;
		if local_percent >= GATING_THRESHOLD_PERCENT {
			info!("metachannel startup gated: local disconnected fraction {:.2}% >= {:.1}%", local_percent, GATING_THRESHOLD_PERCENT);
			return;
		}

		for peer_url in cluster.peer_urls() {
			if config.is_shutting_down() {
				return;
			}
			match cluster.fetch_peer_counts(&peer_url).await {
				Ok(Some(counts)) => {
					if counts.disconnected_percent() >= GATING_THRESHOLD_PERCENT {
						info!("metachannel startup gated: peer '{}' disconnected fraction {:.2}% >= {:.1}%", peer_url, counts.disconnected_percent(), GATING_THRESHOLD_PERCENT);
						return;
					}
				}
				Ok(None) => {
					warn!("peer '{}' did not respond; treating as unknown, not gating on it", peer_url);
				}
				Err(err) => {
					error!("failed to query peer '{}': {}", peer_url, err);
				}
			}
		}

		let batch = needs_meta.iter().take(METACHANNELS_TO_START_AT_A_TIME);
		let mut started = 0usize;
		for channel in batch {
			channel.start_up_meta_channels();
			started += 1;
		}
		if started > 0 {
			info!("started metachannels for {} channel(s)", started);
		}
	}

	/// Shut down the disconnect scheduler, interrupting in-flight ticks
	/// (SPEC_FULL §4.G, separate shutdown hook).
	pub fn shutdown_now(&self) {
		self.cancel.cancel();
		if let Some(handle) = self.handle.lock().take() {
			handle.abort();
		}
	}
}
