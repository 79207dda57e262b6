use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cadence_worker::{GenerationClock, GenerationToken, join_error_panic_message};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, LoopAction};
use crate::entity::AsEntity;
use crate::error::FaultReport;
use crate::phase::{Phase, PhaseSet};
use crate::signal::PhaseSignal;
use crate::spec::{SchedulerSpec, TickSource};

mod dispatch;
mod lane;

pub use dispatch::LoopExit;
use dispatch::{Listener, Suspend, run_phase_loop};
use lane::Lane;

/// Pause state transition published to [`Scheduler::subscribe_pause`] receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseEvent {
	Paused,
	Resumed,
}

/// Status snapshot for one phase lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
	pub phase: Phase,
	pub generation: u64,
	/// Registered entries, including dead ones not purged yet.
	pub subscribers: usize,
	/// Completed wake-ups, paused ones included.
	pub passes: u64,
	pub invocations: u64,
	pub faults: u64,
	pub purged: u64,
}

/// One incarnation of the lanes and loops, replaced on every reset.
pub(crate) struct Generation {
	token: GenerationToken,
	lanes: [Lane; Phase::COUNT],
	faults: broadcast::Sender<FaultReport>,
	pause_events: broadcast::Sender<PauseEvent>,
	loops: Mutex<Vec<(Phase, JoinHandle<LoopExit>)>>,
}

impl Generation {
	fn new(token: GenerationToken, spec: &SchedulerSpec) -> Self {
		let (faults, _) = broadcast::channel(spec.fault_buffer);
		let (pause_events, _) = broadcast::channel(spec.pause_buffer);
		Self {
			token,
			lanes: Phase::ALL.map(Lane::new),
			faults,
			pause_events,
			loops: Mutex::new(Vec::new()),
		}
	}

	fn id(&self) -> u64 {
		self.token.generation()
	}

	fn lane(&self, phase: Phase) -> &Lane {
		&self.lanes[phase.index()]
	}

	fn report_fault(&self, report: FaultReport) {
		tracing::error!(
			phase = %report.phase,
			generation = report.generation,
			entity = %report.entity,
			kind = ?report.kind,
			error = %report.message,
			trace = report.trace.as_deref().unwrap_or_default(),
			"cycle.dispatch.fault"
		);
		let _ = self.faults.send(report);
	}

	/// Cancels every loop of this generation and drops its subscribers.
	fn retire(&self) {
		self.token.cancel();
		for lane in &self.lanes {
			lane.clear();
		}
	}
}

struct SchedulerInner {
	signal: Arc<dyn PhaseSignal>,
	spec: SchedulerSpec,
	paused: Arc<AtomicBool>,
	clock: GenerationClock,
	root: CancellationToken,
	current: RwLock<Arc<Generation>>,
}

impl SchedulerInner {
	fn spawn_generation(signal: &Arc<dyn PhaseSignal>, spec: &SchedulerSpec, paused: &Arc<AtomicBool>, clock: &GenerationClock, root: &CancellationToken) -> Arc<Generation> {
		let token = GenerationToken::new(clock.next(), root.child_token());
		let generation = Arc::new(Generation::new(token, spec));

		let loops = Phase::ALL
			.into_iter()
			.map(|phase| {
				let suspend = match (phase, spec.tick) {
					(Phase::Tick, TickSource::Interval(period)) => Suspend::interval(period),
					_ => Suspend::Signal(Listener::attach(signal, phase)),
				};
				let task = run_phase_loop(Arc::clone(&generation), phase, Arc::clone(paused), suspend);
				(phase, cadence_worker::spawn(phase.as_str(), task))
			})
			.collect();
		*generation.loops.lock() = loops;
		generation
	}

	fn current(&self) -> Arc<Generation> {
		Arc::clone(&self.current.read())
	}
}

impl Drop for SchedulerInner {
	fn drop(&mut self) {
		self.root.cancel();
	}
}

/// Multi-phase frame scheduler.
///
/// A cheap cloneable handle. Construction spawns one dispatch loop per phase;
/// dropping the last handle cancels them.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<SchedulerInner>,
}

/// Non-owning scheduler handle, held by callback adapters.
#[derive(Clone, Default)]
pub struct WeakScheduler {
	inner: Weak<SchedulerInner>,
}

impl WeakScheduler {
	pub fn upgrade(&self) -> Option<Scheduler> {
		self.inner.upgrade().map(|inner| Scheduler { inner })
	}
}

impl fmt::Debug for WeakScheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WeakScheduler").field("alive", &(self.inner.strong_count() > 0)).finish()
	}
}

impl fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler")
			.field("generation", &self.generation())
			.field("paused", &self.is_paused())
			.field("spec", &self.inner.spec)
			.finish_non_exhaustive()
	}
}

impl Scheduler {
	/// Creates a scheduler and starts its dispatch loops.
	///
	/// Loops run on the ambient tokio runtime, or on the shared worker runtime
	/// when called outside one.
	pub fn new(signal: Arc<dyn PhaseSignal>, spec: SchedulerSpec) -> Self {
		let paused = Arc::new(AtomicBool::new(false));
		let clock = GenerationClock::new();
		let root = CancellationToken::new();
		let generation = SchedulerInner::spawn_generation(&signal, &spec, &paused, &clock, &root);

		Self {
			inner: Arc::new(SchedulerInner {
				signal,
				spec,
				paused,
				clock,
				root,
				current: RwLock::new(generation),
			}),
		}
	}

	pub fn downgrade(&self) -> WeakScheduler {
		WeakScheduler {
			inner: Arc::downgrade(&self.inner),
		}
	}

	pub fn spec(&self) -> &SchedulerSpec {
		&self.inner.spec
	}

	/// Current generation ID; starts at 1 and grows on every reset.
	pub fn generation(&self) -> u64 {
		self.inner.current.read().id()
	}

	/// Registers `entity` in every phase.
	pub fn add_to_cycle(&self, entity: &impl AsEntity) {
		self.add_to_phases(PhaseSet::all(), entity);
	}

	/// Registers `entity` in `phase`. Registering twice is a no-op.
	pub fn add_to_phase(&self, phase: Phase, entity: &impl AsEntity) {
		self.inner.current().lane(phase).insert(entity.downgrade_entity());
	}

	pub fn add_to_phases(&self, phases: PhaseSet, entity: &impl AsEntity) {
		let generation = self.inner.current();
		let weak = entity.downgrade_entity();
		for phase in phases.phases() {
			generation.lane(phase).insert(weak.clone());
		}
	}

	/// Deregisters `entity` from every phase.
	pub fn remove_from_cycle(&self, entity: &impl AsEntity) {
		self.remove_from_phases(PhaseSet::all(), entity);
	}

	/// Deregisters `entity` from `phase`. Absent entities are ignored.
	pub fn remove_from_phase(&self, phase: Phase, entity: &impl AsEntity) {
		self.inner.current().lane(phase).remove(&entity.downgrade_entity());
	}

	pub fn remove_from_phases(&self, phases: PhaseSet, entity: &impl AsEntity) {
		let generation = self.inner.current();
		let weak = entity.downgrade_entity();
		for phase in phases.phases() {
			generation.lane(phase).remove(&weak);
		}
	}

	pub fn contains(&self, phase: Phase, entity: &impl AsEntity) -> bool {
		self.inner.current().lane(phase).contains(&entity.downgrade_entity())
	}

	/// Entries registered in `phase`, counting dead ones until they are purged.
	pub fn subscriber_count(&self, phase: Phase) -> usize {
		self.inner.current().lane(phase).len()
	}

	/// Wraps `action` in a [`LoopAction`] bound to `phase`, registering it
	/// unless `auto_register` is false.
	///
	/// The scheduler only holds a weak reference: keep the returned handle.
	pub fn add_listener(&self, action: Action, phase: Phase, auto_register: bool) -> Arc<LoopAction> {
		if auto_register {
			LoopAction::new(self, phase, action)
		} else {
			LoopAction::detached(self, phase, action)
		}
	}

	pub fn remove_listener(&self, action: &Arc<LoopAction>) {
		action.remove_from_cycle();
	}

	/// Suppresses invocations in every phase. Loops keep waking on schedule.
	pub fn pause(&self) {
		if !self.inner.paused.swap(true, Ordering::AcqRel) {
			tracing::debug!(generation = self.generation(), "cycle.pause");
			let _ = self.inner.current().pause_events.send(PauseEvent::Paused);
		}
	}

	/// Resumes invocations from the next wake-up; paused intervals are not replayed.
	pub fn resume(&self) {
		if self.inner.paused.swap(false, Ordering::AcqRel) {
			tracing::debug!(generation = self.generation(), "cycle.resume");
			let _ = self.inner.current().pause_events.send(PauseEvent::Resumed);
		}
	}

	pub fn is_paused(&self) -> bool {
		self.inner.paused.load(Ordering::Acquire)
	}

	/// Subscribes to pause state changes of the current generation.
	///
	/// The channel closes on [`reset`](Self::reset).
	pub fn subscribe_pause(&self) -> broadcast::Receiver<PauseEvent> {
		self.inner.current().pause_events.subscribe()
	}

	/// Subscribes to entity faults of the current generation.
	pub fn subscribe_faults(&self) -> broadcast::Receiver<FaultReport> {
		self.inner.current().faults.subscribe()
	}

	/// Cancels all loops, drops every registration and starts fresh loops.
	///
	/// The pause flag survives; pause and fault subscribers do not.
	pub fn reset(&self) {
		let inner = &self.inner;
		let mut current = inner.current.write();
		current.retire();
		let previous = current.id();
		*current = SchedulerInner::spawn_generation(&inner.signal, &inner.spec, &inner.paused, &inner.clock, &inner.root);
		tracing::debug!(from = previous, to = current.id(), "cycle.reset");
	}

	/// Cancels the current loops and waits for them to exit.
	///
	/// Terminal until the next [`reset`](Self::reset).
	pub async fn shutdown(&self) -> Vec<(Phase, LoopExit)> {
		let generation = self.inner.current();
		generation.retire();
		let loops = std::mem::take(&mut *generation.loops.lock());

		let mut exits = Vec::with_capacity(loops.len());
		for (phase, handle) in loops {
			let exit = match handle.await {
				Ok(exit) => exit,
				Err(err) if err.is_cancelled() => LoopExit::Cancelled,
				Err(err) => {
					let message = err.to_string();
					match join_error_panic_message(err) {
						Some(panic) => LoopExit::Panicked(panic),
						None => LoopExit::JoinFailed(message),
					}
				}
			};
			exits.push((phase, exit));
		}
		exits
	}

	/// Per-phase status of the current generation.
	pub fn snapshot(&self) -> Vec<PhaseRecord> {
		let generation = self.inner.current();
		generation
			.lanes
			.iter()
			.map(|lane| PhaseRecord {
				phase: lane.phase(),
				generation: generation.id(),
				subscribers: lane.len(),
				passes: lane.passes.load(Ordering::Acquire),
				invocations: lane.invocations.load(Ordering::Relaxed),
				faults: lane.faults.load(Ordering::Relaxed),
				purged: lane.purged.load(Ordering::Relaxed),
			})
			.collect()
	}

	/// Status of one phase of the current generation.
	pub fn record(&self, phase: Phase) -> PhaseRecord {
		let mut records = self.snapshot();
		records.swap_remove(phase.index())
	}
}

#[cfg(test)]
mod tests;
