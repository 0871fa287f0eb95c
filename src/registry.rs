//! Concurrent registries keyed by PV base name: archive channels and
//! controlling PVs. Lock-free reads under heavy writer concurrency.

use std::sync::Arc;

use dashmap::DashMap;

use crate::traits::{ArchiveChannel, ControllingPv};
use crate::util::base_name;

/// Concurrent mapping from base name to archive channel. No ordering
/// guarantee; concurrent readers never observe a partial entry (invariant 1
/// in SPEC_FULL §3).
#[derive(Default)]
pub struct ChannelRegistry {
	channels: DashMap<String, Arc<dyn ArchiveChannel>>,
}

impl ChannelRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register under the channel's own base name. Overwrites any prior
	/// entry for the same base name.
	pub fn register(&self, channel: Arc<dyn ArchiveChannel>) {
		self.channels.insert(channel.name().to_string(), channel);
	}

	pub fn get(&self, base_name: &str) -> Option<Arc<dyn ArchiveChannel>> {
		self.channels.get(base_name).map(|entry| entry.value().clone())
	}

	pub fn contains(&self, base_name: &str) -> bool {
		self.channels.contains_key(base_name)
	}

	pub fn remove(&self, base_name: &str) -> Option<Arc<dyn ArchiveChannel>> {
		self.channels.remove(base_name).map(|(_, v)| v)
	}

	pub fn len(&self) -> usize {
		self.channels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.channels.is_empty()
	}

	pub fn clear(&self) {
		self.channels.clear();
	}

	/// Snapshot of every registered channel. Ordering is unspecified.
	pub fn iter(&self) -> Vec<Arc<dyn ArchiveChannel>> {
		self.channels.iter().map(|entry| entry.value().clone()).collect()
	}

	/// Base names of every registered channel.
	pub fn names(&self) -> Vec<String> {
		self.channels.iter().map(|entry| entry.key().clone()).collect()
	}

	/// Test-only: every registered channel whose base name matches. The
	/// registry keys directly on base name, so this is at most one entry;
	/// field-qualified lookups are a collaborator (`ChannelAccessContext`)
	/// concern outside this crate's contract.
	pub fn channels_matching_base_name(&self, pv_name: &str) -> Vec<String> {
		let wanted = base_name(pv_name);
		self.channels.iter().map(|entry| entry.key().clone()).filter(|name| base_name(name) == wanted).collect()
	}
}

/// Concurrent mapping of controlling PVs, stopped in bulk during shutdown.
#[derive(Default)]
pub struct ControllingPvRegistry {
	pvs: DashMap<String, Arc<dyn ControllingPv>>,
}

impl ControllingPvRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, pv: Arc<dyn ControllingPv>) {
		self.pvs.insert(pv.name().to_string(), pv);
	}

	pub fn len(&self) -> usize {
		self.pvs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pvs.is_empty()
	}

	/// Stop every controlling PV and clear the registry (SPEC_FULL §4.G step 5).
	pub fn stop_all(&self) {
		for entry in self.pvs.iter() {
			entry.value().stop();
		}
		self.pvs.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::FakeArchiveChannel;

	#[test]
	fn register_and_lookup_by_base_name() {
		let registry = ChannelRegistry::new();
		let channel = Arc::new(FakeArchiveChannel::new("ROOM:TEMP", 0));
		registry.register(channel.clone());

		assert!(registry.contains("ROOM:TEMP"));
		assert_eq!(registry.get("ROOM:TEMP").unwrap().name(), "ROOM:TEMP");
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn channels_matching_base_name_ignores_field_suffix() {
		let registry = ChannelRegistry::new();
		registry.register(Arc::new(FakeArchiveChannel::new("ROOM:TEMP", 0)));
		registry.register(Arc::new(FakeArchiveChannel::new("ROOM:HUMIDITY", 0)));

		let matches = registry.channels_matching_base_name("ROOM:TEMP.VAL");
		assert_eq!(matches, vec!["ROOM:TEMP".to_string()]);
	}

	#[test]
	fn clear_empties_registry() {
		let registry = ChannelRegistry::new();
		for i in 0..100 {
			registry.register(Arc::new(FakeArchiveChannel::new(&format!("test_{}", i), 0)));
		}
		assert_eq!(registry.len(), 100);
		registry.clear();
		assert!(registry.is_empty());
	}
}
