//! Typed installation-property accessors, read through the `ConfigService`
//! contract. Mirrors the teacher crate's `ControlConfig`: documented
//! defaults, no panics on malformed values.

use std::time::Duration;

use log::warn;

use crate::traits::ConfigService;

const COMMAND_THREAD_COUNT_KEY: &str = "org.epics.archiverappliance.engine.epics.commandThreadCount";
const DISCONNECT_CHECK_TIMEOUT_MINUTES_KEY: &str = "org.epics.archiverappliance.engine.util.EngineContext.disconnectCheckTimeoutInMinutes";
const SAMPLE_BUFFER_CAPACITY_ADJUSTMENT_KEY: &str = "org.epics.archiverappliance.config.PVTypeInfo.sampleBufferCapacityAdjustment";

pub const DEFAULT_COMMAND_THREAD_COUNT: usize = 10;
/// Property-fallback default. The disconnect monitor's period constant is
/// also seeded from this value at startup (see `disconnect::CHECKER_PERIOD`).
pub const DEFAULT_DISCONNECT_CHECK_TIMEOUT_MINUTES: u64 = 10;
pub const DEFAULT_SAMPLE_BUFFER_CAPACITY_ADJUSTMENT: f64 = 1.0;

/// Number of command threads to construct.
pub fn command_thread_count(config: &dyn ConfigService) -> usize {
	read_parsed(config, COMMAND_THREAD_COUNT_KEY, DEFAULT_COMMAND_THREAD_COUNT)
}

/// Disconnect timeout, below which a stuck channel is left alone (timeout
/// `<= 0` disables the disconnect check entirely).
pub fn disconnect_check_timeout(config: &dyn ConfigService) -> Duration {
	let minutes: u64 = read_parsed(config, DISCONNECT_CHECK_TIMEOUT_MINUTES_KEY, DEFAULT_DISCONNECT_CHECK_TIMEOUT_MINUTES);
	Duration::from_secs(minutes * 60)
}

pub fn sample_buffer_capacity_adjustment(config: &dyn ConfigService) -> f64 {
	read_parsed(config, SAMPLE_BUFFER_CAPACITY_ADJUSTMENT_KEY, DEFAULT_SAMPLE_BUFFER_CAPACITY_ADJUSTMENT)
}

fn read_parsed<T>(config: &dyn ConfigService, key: &str, default: T) -> T
where
	T: std::str::FromStr,
{
	match config.get_property(key) {
		None => default,
		Some(raw) => match raw.parse() {
			Ok(value) => value,
			Err(_) => {
				warn!("property '{}' has a malformed value '{}', falling back to default", key, raw);
				default
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::InMemoryConfigService;

	#[test]
	fn defaults_when_unset() {
		let config = InMemoryConfigService::new("appliance1");
		assert_eq!(command_thread_count(&config), DEFAULT_COMMAND_THREAD_COUNT);
		assert_eq!(disconnect_check_timeout(&config), Duration::from_secs(DEFAULT_DISCONNECT_CHECK_TIMEOUT_MINUTES * 60));
		assert_eq!(sample_buffer_capacity_adjustment(&config), DEFAULT_SAMPLE_BUFFER_CAPACITY_ADJUSTMENT);
	}

	#[test]
	fn reads_overridden_values() {
		let config = InMemoryConfigService::new("appliance1");
		config.set_property(COMMAND_THREAD_COUNT_KEY, "4");
		config.set_property(DISCONNECT_CHECK_TIMEOUT_MINUTES_KEY, "20");
		config.set_property(SAMPLE_BUFFER_CAPACITY_ADJUSTMENT_KEY, "2.5");
		assert_eq!(command_thread_count(&config), 4);
		assert_eq!(disconnect_check_timeout(&config), Duration::from_secs(20 * 60));
		assert_eq!(sample_buffer_capacity_adjustment(&config), 2.5);
	}

	#[test]
	fn falls_back_on_malformed_value() {
		let config = InMemoryConfigService::new("appliance1");
		config.set_property(COMMAND_THREAD_COUNT_KEY, "not-a-number");
		assert_eq!(command_thread_count(&config), DEFAULT_COMMAND_THREAD_COUNT);
	}
}
