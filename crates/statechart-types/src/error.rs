use thiserror::Error;

use crate::actor::ActorId;

/// Errors surfaced to callers of the interpreter, per the external interface and
/// error-handling design.
#[derive(Debug, Error)]
pub enum StatechartError {
	#[error("send({event_type}) before start() on machine {machine_id} with deferEvents disabled")]
	UninitializedSend { event_type: String, machine_id: ActorId },

	#[error("machine {machine_id} initial state references unknown state id {state_id}")]
	InvalidInitialState { machine_id: ActorId, state_id: String },

	#[error("no child actor registered under id {id}")]
	UnknownActorId { id: ActorId },

	#[error("action execution failed: {source}")]
	ActionExecution { source: Box<dyn std::error::Error + Send + Sync> },

	#[error("child actor {child_id} reported an error: {source}")]
	ChildError {
		child_id: ActorId,
		source: Box<dyn std::error::Error + Send + Sync>,
	},

	#[error("internal interpreter failure: {0}")]
	Internal(String),
}

impl StatechartError {
	/// Whether the interpreter that produced this error remains usable. Configuration
	/// and send-discipline errors are fatal to *that* interpreter instance; errors
	/// about a specific child or its reported failure are not.
	#[must_use]
	pub fn is_recoverable(&self) -> bool {
		matches!(self, Self::UnknownActorId { .. } | Self::ChildError { .. })
	}
}

pub type Result<T> = std::result::Result<T, StatechartError>;
