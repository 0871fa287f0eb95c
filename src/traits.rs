//! Contracts for collaborators that live outside this crate: the protocol
//! library, per-PV sample policy, storage plugins, and the configuration
//! service (properties, event bus, cluster membership).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EventMessage, PeerCounts, PvTypeInfo};

/// One PV's engine-facing handle: subscription state, sample buffer, policy.
///
/// Implementations live in the channel-access/sampling layer; the engine
/// only ever calls these methods.
pub trait ArchiveChannel: Send + Sync {
	/// The PV's base name (no `.FIELD` suffix).
	fn name(&self) -> &str;

	fn is_connected(&self) -> bool;

	/// Seconds since the last search request was issued for this channel.
	fn seconds_elapsed_since_search_request(&self) -> f64;

	/// Index into the command-thread pool this channel is bound to.
	fn jca_command_thread_id(&self) -> usize;

	fn meta_channels_need_starting_up(&self) -> bool;

	fn start_up_meta_channels(&self);

	fn shutdown_meta_channels(&self);

	/// Stop the channel. Called during shutdown and on pause.
	fn stop(&self);
}

/// A PV whose value gates archiving of other PVs.
pub trait ControllingPv: Send + Sync {
	fn name(&self) -> &str;

	fn stop(&self);
}

/// Destination for flushed event streams, resolved from a storage URL.
#[async_trait]
pub trait StoragePlugin: Send + Sync {
	/// Flush one channel's buffered samples. Errors are logged by the caller
	/// and never abort the rest of the writer tick.
	async fn flush(&self, channel_name: &str) -> Result<()>;
}

/// The protocol library: opens channels and delivers value callbacks.
///
/// Only `doesContextMatchThread` from the source design is modeled here;
/// the rest of the protocol surface is out of scope (see SPEC_FULL §1).
pub trait ChannelAccessContext: Send + Sync {
	/// Whether this context is ready to accept commands.
	fn is_ready(&self) -> bool;
}

/// Global key/value configuration, typed PV-info registry, shutdown hooks.
#[async_trait]
pub trait ConfigService: Send + Sync {
	/// Read an installation property as a string, if set.
	fn get_property(&self, key: &str) -> Option<String>;

	/// Type info for a PV, if known. Keyed by base name.
	fn type_info(&self, base_name: &str) -> Option<PvTypeInfo>;

	/// Whether the appliance is in the process of shutting down.
	fn is_shutting_down(&self) -> bool;

	/// This appliance's identity, as used in event `destination` matching.
	fn my_identity(&self) -> &str;
}

/// Process-wide publish/subscribe bus for coordination events.
#[async_trait]
pub trait EventBus: Send + Sync {
	async fn publish(&self, event: EventMessage);
}

/// Queries peer appliances in the cluster for connected/disconnected counts.
#[async_trait]
pub trait ClusterMembership: Send + Sync {
	/// Engine URLs of every other appliance in the cluster (self excluded).
	fn peer_urls(&self) -> Vec<String>;

	/// Fetch `{engine_url}/ConnectedPVCountForAppliance`. A transport or
	/// parse failure is reported as `Ok(None)`: peer-unknown is not fatal.
	async fn fetch_peer_counts(&self, engine_url: &str) -> Result<Option<PeerCounts>>;
}
