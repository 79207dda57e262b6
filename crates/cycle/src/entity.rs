use std::borrow::Cow;
use std::sync::{Arc, Weak};

use crate::phase::{Phase, PhaseSet};
use crate::scheduler::Scheduler;

/// Result of one phase invocation.
pub type EntityResult = anyhow::Result<()>;

/// Capability an entity exposes to be driven by the [`Scheduler`].
///
/// Every phase method is optional; the provided implementations do nothing.
/// `elapsed` is the time in seconds since the previous occurrence of the phase.
///
/// Entities are shared as `Arc<E>` and the scheduler only keeps weak
/// references. Dropping the last `Arc`, or returning `false` from
/// [`is_alive`](Self::is_alive), takes the entity out of dispatch.
pub trait Schedulable: Send + Sync + 'static {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		Ok(())
	}

	fn on_fixed_update(&self, _elapsed: f32) -> EntityResult {
		Ok(())
	}

	/// Runs after every `on_update` of the same frame.
	fn on_late_update(&self, _elapsed: f32) -> EntityResult {
		Ok(())
	}

	/// Runs after every `on_fixed_update` of the same fixed step.
	fn on_late_fixed_update(&self, _elapsed: f32) -> EntityResult {
		Ok(())
	}

	fn on_tick(&self, _elapsed: f32) -> EntityResult {
		Ok(())
	}

	/// Identity used in fault reports.
	fn label(&self) -> Cow<'static, str> {
		Cow::Borrowed(std::any::type_name::<Self>())
	}

	/// Host liveness predicate. A dead entity is skipped and later purged.
	fn is_alive(&self) -> bool {
		true
	}

	/// Routes `phase` to the matching method.
	fn dispatch(&self, phase: Phase, elapsed: f32) -> EntityResult {
		match phase {
			Phase::Update => self.on_update(elapsed),
			Phase::FixedUpdate => self.on_fixed_update(elapsed),
			Phase::LateUpdate => self.on_late_update(elapsed),
			Phase::LateFixedUpdate => self.on_late_fixed_update(elapsed),
			Phase::Tick => self.on_tick(elapsed),
		}
	}
}

/// Shared handles that can be registered with a [`Scheduler`].
pub trait AsEntity {
	/// Weak reference stored in subscriber lanes.
	fn downgrade_entity(&self) -> Weak<dyn Schedulable>;
}

impl<E: Schedulable> AsEntity for Arc<E> {
	fn downgrade_entity(&self) -> Weak<dyn Schedulable> {
		let weak: Weak<E> = Arc::downgrade(self);
		weak
	}
}

impl AsEntity for Arc<dyn Schedulable> {
	fn downgrade_entity(&self) -> Weak<dyn Schedulable> {
		Arc::downgrade(self)
	}
}

/// Registration syntax on the entity handle itself.
pub trait ScheduleExt {
	fn add_to_cycle(&self, scheduler: &Scheduler);
	fn add_to_phase(&self, scheduler: &Scheduler, phase: Phase);
	fn add_to_phases(&self, scheduler: &Scheduler, phases: PhaseSet);
	fn remove_from_cycle(&self, scheduler: &Scheduler);
	fn remove_from_phase(&self, scheduler: &Scheduler, phase: Phase);
}

impl<T: AsEntity> ScheduleExt for T {
	fn add_to_cycle(&self, scheduler: &Scheduler) {
		scheduler.add_to_cycle(self);
	}

	fn add_to_phase(&self, scheduler: &Scheduler, phase: Phase) {
		scheduler.add_to_phase(phase, self);
	}

	fn add_to_phases(&self, scheduler: &Scheduler, phases: PhaseSet) {
		scheduler.add_to_phases(phases, self);
	}

	fn remove_from_cycle(&self, scheduler: &Scheduler) {
		scheduler.remove_from_cycle(self);
	}

	fn remove_from_phase(&self, scheduler: &Scheduler, phase: Phase) {
		scheduler.remove_from_phase(phase, self);
	}
}
