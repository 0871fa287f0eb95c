//! Core data types shared across the engine: event-bus messages, peer
//! cluster counts, and the PV type-info shape consumed from the config
//! service.

use serde::{Deserialize, Serialize};

use crate::util::base_name;

/// Channel-access protocol generation a PV's type info was published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbrType {
	V3,
	V4,
}

/// Type info for a PV, as consumed by the disconnect monitor's pause/resume
/// gate and the `StartArchivingPV` event handler.
#[derive(Debug, Clone)]
pub struct PvTypeInfo {
	pub is_paused: bool,
	pub extra_fields: Vec<String>,
	pub archive_destination_url: Option<String>,
	pub dbr_type: DbrType,
}

impl PvTypeInfo {
	pub fn new(dbr_type: DbrType) -> Self {
		Self { is_paused: false, extra_fields: Vec::new(), archive_destination_url: None, dbr_type }
	}
}

/// `(total, disconnected)` channel counts reported by a peer appliance, as
/// returned by `GET {engineURL}/ConnectedPVCountForAppliance`.
///
/// The wire format encodes both fields as JSON strings of integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCounts {
	pub total: u64,
	pub disconnected: u64,
}

impl PeerCounts {
	/// Percentage of disconnected channels, in `[0.0, 100.0]`. `0.0` when
	/// `total` is zero.
	pub fn disconnected_percent(&self) -> f64 {
		if self.total == 0 {
			0.0
		} else {
			(self.disconnected as f64) * 100.0 / (self.total as f64)
		}
	}
}

#[derive(Debug, Deserialize)]
struct RawPeerCounts {
	total: String,
	disconnected: String,
}

impl std::str::FromStr for PeerCounts {
	type Err = serde_json::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let raw: RawPeerCounts = serde_json::from_str(s)?;
		let total = raw.total.parse().map_err(serde::de::Error::custom)?;
		let disconnected = raw.disconnected.parse().map_err(serde::de::Error::custom)?;
		Ok(Self { total, disconnected })
	}
}

/// A coordination event carried on the process-wide event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
	pub destination: String,
	#[serde(rename = "type")]
	pub kind: EventKind,
	pub source: String,
	pub pv_name: String,
	pub payload: Option<String>,
}

/// Identity used to address events at "every appliance".
pub const DESTINATION_ALL: &str = "ALL";

impl EventMessage {
	pub fn is_for(&self, my_identity: &str) -> bool {
		self.destination == DESTINATION_ALL || self.destination == my_identity
	}

	pub fn base_pv_name(&self) -> &str {
		base_name(&self.pv_name)
	}

	/// A field-qualified PV name (anything after the base name) has an empty
	/// extra-field list when computing meta info.
	pub fn has_field_suffix(&self) -> bool {
		self.pv_name.len() != self.base_pv_name().len()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventKind {
	ComputeMetaInfo,
	MetaInfoRequested,
	MetaInfoFinished,
	StartArchivingPV,
	StartedArchivingPV,
}
