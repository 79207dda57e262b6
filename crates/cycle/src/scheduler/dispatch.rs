use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cadence_worker::panic_message;
use tokio::time::{Interval, MissedTickBehavior};

use super::Generation;
use super::lane::{Lane, live};
use crate::error::FaultReport;
use crate::phase::Phase;
use crate::signal::{PhaseSignal, Wake};

/// Why a dispatch loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoopExit {
	/// The generation was cancelled by a reset, shutdown or drop.
	Cancelled,
	/// The phase signal reported it is closed.
	SignalClosed,
	/// The loop task itself panicked.
	Panicked(String),
	/// The loop task could not be joined.
	JoinFailed(String),
}

/// A loop's claim on a phase of the signal, held from spawn until the loop
/// future is dropped.
pub(super) struct Listener {
	signal: Arc<dyn PhaseSignal>,
	phase: Phase,
}

impl Listener {
	pub(super) fn attach(signal: &Arc<dyn PhaseSignal>, phase: Phase) -> Self {
		signal.attach(phase);
		Self {
			signal: Arc::clone(signal),
			phase,
		}
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		self.signal.detach(self.phase);
	}
}

/// Source of wake-ups for one loop.
pub(super) enum Suspend {
	Signal(Listener),
	/// The timer is built on first use, inside the loop task.
	Interval { period: Duration, timer: Option<Interval> },
}

impl Suspend {
	pub(super) fn interval(period: Duration) -> Self {
		Self::Interval { period, timer: None }
	}

	async fn next(&mut self, phase: Phase) -> Option<Wake> {
		match self {
			Self::Signal(listener) => listener.signal.wait(phase).await,
			Self::Interval { period, timer } => {
				let period = *period;
				let timer = timer.get_or_insert_with(|| {
					// The first tick of a plain interval fires immediately.
					let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
					timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
					timer
				});
				timer.tick().await;
				Some(Wake::new(period.as_secs_f32()))
			}
		}
	}
}

/// Dispatch loop for one phase of one generation.
pub(super) async fn run_phase_loop(generation: Arc<Generation>, phase: Phase, paused: Arc<AtomicBool>, mut suspend: Suspend) -> LoopExit {
	let lane = generation.lane(phase);
	let token = generation.token.clone();
	let mut purge_pending = false;

	tracing::debug!(phase = %phase, generation = token.generation(), "cycle.loop.start");

	let exit = loop {
		let wake = tokio::select! {
			biased;
			_ = token.cancelled() => break LoopExit::Cancelled,
			wake = suspend.next(phase) => wake,
		};
		let Some(wake) = wake else {
			break LoopExit::SignalClosed;
		};
		if token.is_cancelled() {
			break LoopExit::Cancelled;
		}

		if std::mem::take(&mut purge_pending) {
			let removed = lane.purge();
			if removed > 0 {
				tracing::trace!(phase = %phase, removed, "cycle.lane.purge");
			}
		}

		if !paused.load(Ordering::Acquire) {
			purge_pending = dispatch_pass(&generation, lane, wake.elapsed());
		}

		lane.passes.fetch_add(1, Ordering::AcqRel);
		wake.complete();
	};

	tracing::debug!(phase = %phase, generation = token.generation(), exit = ?exit, "cycle.loop.exit");
	exit
}

/// Invokes every live subscriber once. Returns true if a dead or faulting
/// entry was seen, which schedules a purge before the next pass.
///
/// The length is read once: subscribers added during the pass wait for the
/// next one, and a shrinking list simply ends the pass early.
fn dispatch_pass(generation: &Generation, lane: &Lane, elapsed: f32) -> bool {
	let phase = lane.phase();
	let mut needs_purge = false;

	for index in 0..lane.len() {
		let Some(entry) = lane.get(index) else {
			break;
		};
		let Some(entity) = live(&entry) else {
			needs_purge = true;
			continue;
		};

		lane.invocations.fetch_add(1, Ordering::Relaxed);
		let report = match catch_unwind(AssertUnwindSafe(|| entity.dispatch(phase, elapsed))) {
			Ok(Ok(())) => continue,
			Ok(Err(err)) => FaultReport::failed(phase, generation.id(), entity.label().into_owned(), &err),
			Err(payload) => FaultReport::panicked(phase, generation.id(), entity.label().into_owned(), panic_message(&*payload)),
		};

		needs_purge = true;
		lane.faults.fetch_add(1, Ordering::Relaxed);
		generation.report_fault(report);
	}

	needs_purge
}
