//! Event-bus subscriber: handles `ComputeMetaInfo` and `StartArchivingPV`
//! events addressed to this appliance, replying with confirmation events.

use std::sync::Arc;

use dashmap::DashMap;
use log::error;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::traits::{ConfigService, EventBus};
use crate::types::{DbrType, EventKind, EventMessage};

pub struct EventSubscriber {
	config: Arc<dyn ConfigService>,
	bus: Arc<dyn EventBus>,
	in_flight_meta_info: DashMap<String, CancellationToken>,
}

impl EventSubscriber {
	pub fn new(config: Arc<dyn ConfigService>, bus: Arc<dyn EventBus>) -> Self {
		Self { config, bus, in_flight_meta_info: DashMap::new() }
	}

	/// Cancel an in-progress `ComputeMetaInfo` computation for `pv_name`, if
	/// one is outstanding. A no-op if none is running (SPEC_FULL §6).
	pub fn abort_metadata_computation(&self, pv_name: &str) {
		if let Some((_, token)) = self.in_flight_meta_info.remove(pv_name) {
			token.cancel();
		}
	}

	/// Dispatch one event. Only events addressed to `ALL` or this
	/// appliance's identity are processed; everything else is ignored.
	/// All handler failures are caught and logged, never re-entering the bus.
	pub async fn handle(&self, event: EventMessage) {
		if !event.is_for(self.config.my_identity()) {
			return;
		}

		match event.kind {
			EventKind::ComputeMetaInfo => self.handle_compute_meta_info(&event).await,
			EventKind::StartArchivingPV => self.handle_start_archiving_pv(&event).await,
			other => {
				error!("no handler for event kind {:?} on PV '{}'; ignoring", other, event.pv_name);
			}
		}
	}

	async fn handle_compute_meta_info(&self, event: &EventMessage) {
		let requested = EventMessage {
			destination: event.source.clone(),
			kind: EventKind::MetaInfoRequested,
			source: self.config.my_identity().to_string(),
			pv_name: event.pv_name.clone(),
			payload: None,
		};
		self.bus.publish(requested).await;

		let token = CancellationToken::new();
		self.in_flight_meta_info.insert(event.pv_name.clone(), token.clone());

		let extra_fields: Vec<String> = if event.has_field_suffix() {
			Vec::new()
		} else {
			self.config.type_info(event.base_pv_name()).map(|info| info.extra_fields).unwrap_or_default()
		};

		let metadata = json!({ "pvName": event.base_pv_name(), "extraFields": extra_fields });
		let payload = match serde_json::to_string(&metadata) {
			Ok(payload) => payload,
			Err(err) => {
				error!("failed to serialise meta info for PV '{}': {}", event.pv_name, err);
				self.in_flight_meta_info.remove(&event.pv_name);
				return;
			}
		};

		if token.is_cancelled() {
			self.in_flight_meta_info.remove(&event.pv_name);
			return;
		}

		let finished = EventMessage {
			destination: event.source.clone(),
			kind: EventKind::MetaInfoFinished,
			source: self.config.my_identity().to_string(),
			pv_name: event.pv_name.clone(),
			payload: Some(payload),
		};
		self.bus.publish(finished).await;
		self.in_flight_meta_info.remove(&event.pv_name);
	}

	async fn handle_start_archiving_pv(&self, event: &EventMessage) {
		let type_info = match self.config.type_info(event.base_pv_name()) {
			Some(info) => info,
			None => {
				error!("cannot start archiving '{}': missing type info", event.pv_name);
				return;
			}
		};

		let destination = match &type_info.archive_destination_url {
			Some(url) => url,
			None => {
				error!("cannot start archiving '{}': no storage destination configured", event.pv_name);
				return;
			}
		};

		match type_info.dbr_type {
			DbrType::V3 => self.start_archiving_v3(event, destination),
			DbrType::V4 => self.start_archiving_v4(event, destination),
		}

		let started = EventMessage {
			destination: event.source.clone(),
			kind: EventKind::StartedArchivingPV,
			source: self.config.my_identity().to_string(),
			pv_name: event.pv_name.clone(),
			payload: None,
		};
		self.bus.publish(started).await;
	}

	fn start_archiving_v3(&self, event: &EventMessage, destination: &str) {
		log::info!("starting V3 archiving for '{}' -> '{}'", event.pv_name, destination);
	}

	fn start_archiving_v4(&self, event: &EventMessage, destination: &str) {
		log::info!("starting V4 archiving for '{}' -> '{}'", event.pv_name, destination);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::{InMemoryConfigService, InMemoryEventBus};
	use crate::types::PvTypeInfo;

	#[tokio::test]
	async fn compute_meta_info_posts_requested_then_finished() {
		let config = Arc::new(InMemoryConfigService::new("appliance1"));
		config.set_type_info("ROOM:TEMP", PvTypeInfo::new(DbrType::V3));
		let bus = Arc::new(InMemoryEventBus::new());
		let subscriber = EventSubscriber::new(config.clone(), bus.clone());

		let event = EventMessage {
			destination: "ALL".to_string(),
			kind: EventKind::ComputeMetaInfo,
			source: "appliance2".to_string(),
			pv_name: "ROOM:TEMP".to_string(),
			payload: None,
		};
		subscriber.handle(event).await;

		let published = bus.published();
		assert_eq!(published.len(), 2);
		assert_eq!(published[0].kind, EventKind::MetaInfoRequested);
		assert_eq!(published[1].kind, EventKind::MetaInfoFinished);
		assert!(published[1].payload.is_some());
	}

	#[tokio::test]
	async fn events_not_addressed_to_us_are_ignored() {
		let config = Arc::new(InMemoryConfigService::new("appliance1"));
		let bus = Arc::new(InMemoryEventBus::new());
		let subscriber = EventSubscriber::new(config, bus.clone());

		let event = EventMessage {
			destination: "appliance2".to_string(),
			kind: EventKind::ComputeMetaInfo,
			source: "appliance3".to_string(),
			pv_name: "ROOM:TEMP".to_string(),
			payload: None,
		};
		subscriber.handle(event).await;
		assert!(bus.published().is_empty());
	}

	#[tokio::test]
	async fn start_archiving_pv_without_type_info_emits_no_confirmation() {
		let config = Arc::new(InMemoryConfigService::new("appliance1"));
		let bus = Arc::new(InMemoryEventBus::new());
		let subscriber = EventSubscriber::new(config, bus.clone());

		let event = EventMessage {
			destination: "ALL".to_string(),
			kind: EventKind::StartArchivingPV,
			source: "appliance2".to_string(),
			pv_name: "ROOM:TEMP".to_string(),
			payload: None,
		};
		subscriber.handle(event).await;
		assert!(bus.published().is_empty());
	}

	#[tokio::test]
	async fn aborting_an_unknown_computation_is_a_no_op() {
		let config = Arc::new(InMemoryConfigService::new("appliance1"));
		let bus = Arc::new(InMemoryEventBus::new());
		let subscriber = EventSubscriber::new(config, bus);
		subscriber.abort_metadata_computation("ROOM:TEMP");
	}

	#[tokio::test]
	async fn start_archiving_pv_posts_confirmation() {
		let config = Arc::new(InMemoryConfigService::new("appliance1"));
		let mut info = PvTypeInfo::new(DbrType::V4);
		info.archive_destination_url = Some("pb://storage1".to_string());
		config.set_type_info("ROOM:TEMP", info);
		let bus = Arc::new(InMemoryEventBus::new());
		let subscriber = EventSubscriber::new(config, bus.clone());

		let event = EventMessage {
			destination: "ALL".to_string(),
			kind: EventKind::StartArchivingPV,
			source: "appliance2".to_string(),
			pv_name: "ROOM:TEMP".to_string(),
			payload: None,
		};
		subscriber.handle(event).await;

		let published = bus.published();
		assert_eq!(published.len(), 1);
		assert_eq!(published[0].kind, EventKind::StartedArchivingPV);
	}
}
