//! Crate-wide error type.

use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors that can propagate out of an `EngineContext` operation.
///
/// Periodic ticks and event-bus handlers never let these escape: they log
/// and continue instead. `EngineError` is for operations that legitimately
/// return a `Result` to their caller (construction, explicit admin calls).
#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	#[error("peer request failed: {0}")]
	Peer(#[from] reqwest::Error),

	#[error("no command thread context is ready for slot {0}")]
	ContextNotReady(usize),

	#[error("command thread {0} does not exist (pool size is {1})")]
	NoSuchCommandThread(usize, usize),

	#[error("a main scheduler is already installed")]
	SchedulerAlreadyInstalled,

	#[error("missing type info for PV '{0}'")]
	MissingTypeInfo(String),

	#[error("no storage destination configured for PV '{0}'")]
	NoStorageDestination(String),

	#[error("channel collaborator error: {0}")]
	Channel(String),

	#[error("engine is shutting down")]
	ShuttingDown,
}

impl<T> From<crossbeam_channel::SendError<T>> for EngineError {
	fn from(_: crossbeam_channel::SendError<T>) -> Self {
		Self::Channel("command queue is disconnected".to_string())
	}
}
