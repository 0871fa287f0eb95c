//! Pool of command threads: one dedicated OS thread per protocol context, so
//! that I/O for channels on the same context always serialises on the same
//! thread instead of contending for a single lock inside the protocol
//! library.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info};
use parking_lot::RwLock;

use crate::registry::ChannelRegistry;
use crate::traits::ChannelAccessContext;
use crate::util::{base_name, stable_thread_index};

const STARTUP_BARRIER_ITERATIONS: u32 = 60;
const STARTUP_BARRIER_INTERVAL: Duration = Duration::from_secs(1);

/// Work enqueued onto one command thread's in-thread queue. The queue is
/// drained only by the thread that owns it.
pub enum Command {
	Run(Box<dyn FnOnce() + Send>),
}

/// One protocol-context-owning OS thread. `sender` and `handle` are taken
/// out on `shutdown`, closing the queue and joining the thread; absent a
/// shutdown, the thread is joined on drop via `jod_thread`.
struct CommandThread {
	sender: parking_lot::Mutex<Option<Sender<Command>>>,
	context: Arc<RwLock<Option<Arc<dyn ChannelAccessContext>>>>,
	handle: parking_lot::Mutex<Option<jod_thread::JoinHandle<()>>>,
}

impl CommandThread {
	fn spawn(context_factory: Arc<dyn Fn() -> Arc<dyn ChannelAccessContext> + Send + Sync>) -> Self {
		let (sender, receiver): (Sender<Command>, Receiver<Command>) = unbounded();
		let context: Arc<RwLock<Option<Arc<dyn ChannelAccessContext>>>> = Arc::new(RwLock::new(None));
		let context_for_thread = context.clone();

		let handle = jod_thread::spawn(move || {
			let ctx = context_factory();
			*context_for_thread.write() = Some(ctx);
			for command in receiver.iter() {
				match command {
					Command::Run(job) => job(),
				}
			}
		});

		Self { sender: parking_lot::Mutex::new(Some(sender)), context, handle: parking_lot::Mutex::new(Some(handle)) }
	}

	pub fn is_ready(&self) -> bool {
		self.context.read().is_some()
	}

	fn enqueue(&self, job: Box<dyn FnOnce() + Send>) -> crate::error::Result<()> {
		match self.sender.lock().as_ref() {
			Some(sender) => {
				sender.send(Command::Run(job))?;
				Ok(())
			}
			None => Err(crate::error::EngineError::ShuttingDown),
		}
	}

	/// Close the queue and join the OS thread. Idempotent.
	fn shutdown(&self) {
		self.sender.lock().take();
		if let Some(handle) = self.handle.lock().take() {
			handle.join();
		}
	}
}

/// Pool of `N` command threads, plus the assignment policy binding each PV's
/// base name to a stable thread id.
pub struct CommandThreadPool {
	threads: Vec<CommandThread>,
	shutting_down: AtomicBool,
}

impl CommandThreadPool {
	/// Construct `count` threads eagerly, then poll up to 60 iterations of 1
	/// second each for every context to become ready (SPEC_FULL §4.A).
	pub fn new(count: usize, context_factory: Arc<dyn Fn() -> Arc<dyn ChannelAccessContext> + Send + Sync>) -> Self {
		assert!(count > 0, "command thread pool must have at least one thread");
		let threads: Vec<CommandThread> = (0..count).map(|_| CommandThread::spawn(context_factory.clone())).collect();
		let pool = Self { threads, shutting_down: AtomicBool::new(false) };
		pool.wait_for_startup_barrier();
		pool
	}

	fn wait_for_startup_barrier(&self) {
		for _ in 0..STARTUP_BARRIER_ITERATIONS {
			if self.threads.iter().all(CommandThread::is_ready) {
				info!("all {} command thread contexts are ready", self.threads.len());
				return;
			}
			thread::sleep(STARTUP_BARRIER_INTERVAL);
		}
		for (i, t) in self.threads.iter().enumerate() {
			if !t.is_ready() {
				error!("command thread {} context failed to initialise within the startup barrier", i);
			}
		}
	}

	pub fn thread_count(&self) -> usize {
		self.threads.len()
	}

	/// 0-based accessor; `None` if out of range.
	pub fn get_command_thread(&self, index: usize) -> Option<&CommandThread> {
		self.threads.get(index)
	}

	/// Stable hashing over the base name; reuses an already-registered
	/// channel's thread id instead of recomputing, even for field-qualified
	/// lookups (SPEC_FULL invariant 3, scenario S2).
	pub fn assign_command_thread(&self, pv_name: &str, registry: &ChannelRegistry) -> usize {
		let base = base_name(pv_name);
		if let Some(channel) = registry.get(base) {
			return channel.jca_command_thread_id();
		}
		stable_thread_index(base, self.threads.len())
	}

	/// Verifies an incoming callback is on the expected context. Returns
	/// `true` defensively (accepting the callback) if the slot's context
	/// never became ready.
	pub fn does_context_match_thread(&self, ctx: &Arc<dyn ChannelAccessContext>, index: usize) -> bool {
		match self.threads.get(index) {
			None => false,
			Some(t) => match t.context.read().as_ref() {
				Some(existing) => Arc::ptr_eq(existing, ctx),
				None => true,
			},
		}
	}

	/// Enqueue a job onto a specific thread's command queue.
	pub fn submit(&self, index: usize, job: Box<dyn FnOnce() + Send>) -> crate::error::Result<()> {
		let thread = self.threads.get(index).ok_or(crate::error::EngineError::NoSuchCommandThread(index, self.threads.len()))?;
		thread.enqueue(job)
	}

	/// Shut down every command thread (SPEC_FULL §4.G step 7): close each
	/// thread's queue and join it. Idempotent.
	pub fn shutdown(&self) {
		self.shutting_down.store(true, Ordering::SeqCst);
		for thread in &self.threads {
			thread.shutdown();
		}
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::SeqCst)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_util::{FakeArchiveChannel, FakeChannelAccessContext};
	use std::sync::Arc;

	fn context_factory() -> Arc<dyn Fn() -> Arc<dyn ChannelAccessContext> + Send + Sync> {
		Arc::new(|| Arc::new(FakeChannelAccessContext::new()) as Arc<dyn ChannelAccessContext>)
	}

	#[test]
	fn all_contexts_ready_after_construction() {
		let pool = CommandThreadPool::new(4, context_factory());
		assert_eq!(pool.thread_count(), 4);
		for i in 0..4 {
			assert!(pool.get_command_thread(i).unwrap().is_ready());
		}
	}

	#[test]
	fn assignment_is_stable_across_base_and_field_name() {
		let pool = CommandThreadPool::new(4, context_factory());
		let registry = ChannelRegistry::new();

		let first = pool.assign_command_thread("ROOM:TEMP", &registry);
		registry.register(Arc::new(FakeArchiveChannel::new("ROOM:TEMP", first)));

		let second = pool.assign_command_thread("ROOM:TEMP.VAL", &registry);
		assert_eq!(first, second);
	}

	#[test]
	fn assignment_depends_only_on_base_name() {
		let pool = CommandThreadPool::new(4, context_factory());
		let registry = ChannelRegistry::new();
		let a = pool.assign_command_thread("ROOM:TEMP", &registry);
		let b = pool.assign_command_thread("ROOM:TEMP.VAL", &registry);
		assert_eq!(a, b);
		assert!(a < 4);
	}

	#[test]
	fn submit_runs_job_on_owning_thread() {
		let pool = CommandThreadPool::new(2, context_factory());
		let (tx, rx) = std::sync::mpsc::channel();
		pool.submit(0, Box::new(move || tx.send(()).unwrap())).unwrap();
		rx.recv_timeout(Duration::from_secs(1)).expect("job should run");
	}

	#[test]
	fn shutdown_joins_every_thread_and_rejects_further_submits() {
		let pool = CommandThreadPool::new(3, context_factory());
		pool.shutdown();
		assert!(pool.is_shutting_down());
		assert!(pool.submit(0, Box::new(|| {})).is_err());
	}
}
