//! Manual-exercise entrypoint: wires an `EngineContext` against the
//! in-memory test doubles and drives one writer tick and one disconnect
//! tick, so the crate is runnable end-to-end without a real Channel Access
//! network.

use std::sync::Arc;
use std::time::Duration;

use archive_engine::engine::EngineContext;
use archive_engine::test_util::{FakeArchiveChannel, FakeChannelAccessContext, FakeStoragePlugin, InMemoryConfigService, StubPeerCountSource};
use archive_engine::traits::{ChannelAccessContext, ClusterMembership, ConfigService};

#[tokio::main]
async fn main() {
	archive_engine::logger::init(log::LevelFilter::Info, log::LevelFilter::Debug).expect("failed to initialise logging");

	let config: Arc<dyn ConfigService> = Arc::new(InMemoryConfigService::new("appliance1"));
	let context_factory: Arc<dyn Fn() -> Arc<dyn ChannelAccessContext> + Send + Sync> = Arc::new(|| Arc::new(FakeChannelAccessContext::new()) as Arc<dyn ChannelAccessContext>);

	let engine = EngineContext::new(config, context_factory);

	for i in 0..10 {
		let name = format!("DEMO:PV:{}", i);
		let thread_id = engine.assign_command_thread(&name);
		engine.channel_registry().register(Arc::new(FakeArchiveChannel::new(&name, thread_id)));
	}
	log::info!("registered {} demo channels", engine.channel_registry().len());

	let storage = Arc::new(FakeStoragePlugin::new());
	let period = engine.start_write_thread(1, storage.clone()).expect("writer should start");
	log::info!("writer started with period {:?}", period);

	let cluster: Arc<dyn ClusterMembership> = Arc::new(StubPeerCountSource::empty());
	engine.start_disconnect_monitor(cluster);

	tokio::time::sleep(Duration::from_millis(1500)).await;

	log::info!("flushes so far: {}, average flush seconds: {}", storage.flush_count(), engine.average_seconds_consumed_by_writer());

	engine.shutdown_disconnect_monitor_now();
	let shutdown_storage = FakeStoragePlugin::new();
	engine.shutdown(&shutdown_storage).await;
	log::info!("engine shut down; registry size now {}", engine.channel_registry().len());
}
