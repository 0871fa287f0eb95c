//! In-memory test doubles for every external collaborator trait. No mocking
//! framework: plain structs backed by `DashMap`/`Mutex`, matching the
//! teacher crate's own hand-written doubles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::traits::{ArchiveChannel, ChannelAccessContext, ClusterMembership, ConfigService, ControllingPv, EventBus, StoragePlugin};
use crate::types::{EventMessage, PeerCounts, PvTypeInfo};

/// In-memory `ConfigService`: plain properties map plus a type-info map.
pub struct InMemoryConfigService {
	properties: DashMap<String, String>,
	type_infos: DashMap<String, PvTypeInfo>,
	shutting_down: AtomicBool,
	identity: String,
}

impl InMemoryConfigService {
	pub fn new(identity: &str) -> Self {
		Self { properties: DashMap::new(), type_infos: DashMap::new(), shutting_down: AtomicBool::new(false), identity: identity.to_string() }
	}

	pub fn set_property(&self, key: &str, value: &str) {
		self.properties.insert(key.to_string(), value.to_string());
	}

	pub fn set_type_info(&self, base_name: &str, info: PvTypeInfo) {
		self.type_infos.insert(base_name.to_string(), info);
	}

	pub fn set_shutting_down(&self, value: bool) {
		self.shutting_down.store(value, Ordering::SeqCst);
	}
}

#[async_trait]
impl ConfigService for InMemoryConfigService {
	fn get_property(&self, key: &str) -> Option<String> {
		self.properties.get(key).map(|v| v.clone())
	}

	fn type_info(&self, base_name: &str) -> Option<PvTypeInfo> {
		self.type_infos.get(base_name).map(|v| v.clone())
	}

	fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::SeqCst)
	}

	fn my_identity(&self) -> &str {
		&self.identity
	}
}

/// In-memory `ArchiveChannel` double with recordable state transitions.
pub struct FakeArchiveChannel {
	name: String,
	thread_id: usize,
	connected: AtomicBool,
	seconds_elapsed_since_search_request: f64,
	needs_meta: AtomicBool,
	meta_started: AtomicBool,
	stopped: AtomicBool,
}

impl FakeArchiveChannel {
	pub fn new(name: &str, thread_id: usize) -> Self {
		Self {
			name: name.to_string(),
			thread_id,
			connected: AtomicBool::new(true),
			seconds_elapsed_since_search_request: 0.0,
			needs_meta: AtomicBool::new(false),
			meta_started: AtomicBool::new(false),
			stopped: AtomicBool::new(false),
		}
	}

	pub fn disconnected(name: &str, thread_id: usize, seconds_elapsed_since_search_request: f64) -> Self {
		Self { connected: AtomicBool::new(false), seconds_elapsed_since_search_request, ..Self::new(name, thread_id) }
	}

	pub fn needs_meta(name: &str, thread_id: usize) -> Self {
		let channel = Self::new(name, thread_id);
		channel.needs_meta.store(true, Ordering::SeqCst);
		channel
	}

	pub fn was_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	pub fn meta_channels_started(&self) -> bool {
		self.meta_started.load(Ordering::SeqCst)
	}
}

impl ArchiveChannel for FakeArchiveChannel {
	fn name(&self) -> &str {
		&self.name
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	fn seconds_elapsed_since_search_request(&self) -> f64 {
		self.seconds_elapsed_since_search_request
	}

	fn jca_command_thread_id(&self) -> usize {
		self.thread_id
	}

	fn meta_channels_need_starting_up(&self) -> bool {
		self.needs_meta.load(Ordering::SeqCst)
	}

	fn start_up_meta_channels(&self) {
		self.meta_started.store(true, Ordering::SeqCst);
		self.needs_meta.store(false, Ordering::SeqCst);
	}

	fn shutdown_meta_channels(&self) {
		self.meta_started.store(false, Ordering::SeqCst);
	}

	fn stop(&self) {
		self.stopped.store(true, Ordering::SeqCst);
	}
}

/// In-memory `ControllingPv` double.
pub struct FakeControllingPv {
	name: String,
	stopped: AtomicBool,
}

impl FakeControllingPv {
	pub fn new(name: &str) -> Self {
		Self { name: name.to_string(), stopped: AtomicBool::new(false) }
	}

	pub fn was_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}
}

impl ControllingPv for FakeControllingPv {
	fn name(&self) -> &str {
		&self.name
	}

	fn stop(&self) {
		self.stopped.store(true, Ordering::SeqCst);
	}
}

/// In-memory `StoragePlugin` that counts flushes instead of writing anywhere.
pub struct FakeStoragePlugin {
	flush_count: AtomicU64,
}

impl FakeStoragePlugin {
	pub fn new() -> Self {
		Self { flush_count: AtomicU64::new(0) }
	}

	pub fn flush_count(&self) -> u64 {
		self.flush_count.load(Ordering::SeqCst)
	}
}

impl Default for FakeStoragePlugin {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StoragePlugin for FakeStoragePlugin {
	async fn flush(&self, _channel_name: &str) -> Result<()> {
		self.flush_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Always-ready fake protocol context.
pub struct FakeChannelAccessContext;

impl FakeChannelAccessContext {
	pub fn new() -> Self {
		Self
	}
}

impl Default for FakeChannelAccessContext {
	fn default() -> Self {
		Self::new()
	}
}

impl ChannelAccessContext for FakeChannelAccessContext {
	fn is_ready(&self) -> bool {
		true
	}
}

/// In-memory event bus: publishes are just appended to a log, not
/// redelivered to any subscriber. Tests read the log directly.
pub struct InMemoryEventBus {
	published: Mutex<Vec<EventMessage>>,
}

impl InMemoryEventBus {
	pub fn new() -> Self {
		Self { published: Mutex::new(Vec::new()) }
	}

	pub fn published(&self) -> Vec<EventMessage> {
		self.published.lock().clone()
	}
}

impl Default for InMemoryEventBus {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl EventBus for InMemoryEventBus {
	async fn publish(&self, event: EventMessage) {
		self.published.lock().push(event);
	}
}

/// Stubbed cluster membership: a fixed peer-url list, each mapped to a
/// canned `PeerCounts` response (or no entry, simulating a non-responding
/// peer).
pub struct StubPeerCountSource {
	responses: Vec<(String, PeerCounts)>,
}

impl StubPeerCountSource {
	pub fn new(responses: Vec<(String, PeerCounts)>) -> Self {
		Self { responses }
	}

	pub fn empty() -> Self {
		Self { responses: Vec::new() }
	}
}

#[async_trait]
impl ClusterMembership for StubPeerCountSource {
	fn peer_urls(&self) -> Vec<String> {
		self.responses.iter().map(|(url, _)| url.clone()).collect()
	}

	async fn fetch_peer_counts(&self, engine_url: &str) -> Result<Option<PeerCounts>> {
		Ok(self.responses.iter().find(|(url, _)| url == engine_url).map(|(_, counts)| *counts))
	}
}
