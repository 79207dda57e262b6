use thiserror::Error;

use crate::phase::Phase;

/// Errors signalled to callers of the scheduling API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
	/// A callback adapter was invoked before a callback was set.
	#[error("no action set for loop action in phase {phase}")]
	MissingAction {
		/// The phase the adapter is bound to.
		phase: Phase,
	},
}

/// How an entity failed during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
	/// The phase method returned an error.
	Failed,
	/// The phase method panicked.
	Panicked,
}

/// One isolated entity fault observed by a dispatch loop.
///
/// Faults never escape the loop. They are logged and published to
/// [`Scheduler::subscribe_faults`](crate::Scheduler::subscribe_faults)
/// receivers; the entity stays registered and is retried next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
	pub phase: Phase,
	pub generation: u64,
	pub entity: String,
	pub kind: FaultKind,
	pub message: String,
	/// Full error chain for `Failed` faults.
	pub trace: Option<String>,
}

impl FaultReport {
	pub(crate) fn failed(phase: Phase, generation: u64, entity: String, err: &anyhow::Error) -> Self {
		Self {
			phase,
			generation,
			entity,
			kind: FaultKind::Failed,
			message: err.to_string(),
			trace: Some(format!("{err:?}")),
		}
	}

	pub(crate) fn panicked(phase: Phase, generation: u64, entity: String, message: String) -> Self {
		Self {
			phase,
			generation,
			entity,
			kind: FaultKind::Panicked,
			message,
			trace: None,
		}
	}
}
