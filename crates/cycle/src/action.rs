use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entity::{EntityResult, Schedulable};
use crate::error::ScheduleError;
use crate::phase::Phase;
use crate::scheduler::{Scheduler, WeakScheduler};

type RemoveHook = Box<dyn FnOnce() + Send>;

/// Callback wrapped by a [`LoopAction`].
#[derive(Clone)]
pub enum Action {
	/// Receives the phase's elapsed time.
	Timed(Arc<dyn Fn(f32) + Send + Sync>),
	/// Ignores the elapsed time.
	Plain(Arc<dyn Fn() + Send + Sync>),
}

impl Action {
	pub fn timed(f: impl Fn(f32) + Send + Sync + 'static) -> Self {
		Self::Timed(Arc::new(f))
	}

	pub fn plain(f: impl Fn() + Send + Sync + 'static) -> Self {
		Self::Plain(Arc::new(f))
	}

	fn call(&self, elapsed: f32) {
		match self {
			Self::Timed(f) => f(elapsed),
			Self::Plain(f) => f(),
		}
	}
}

impl fmt::Debug for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Timed(_) => f.write_str("Action::Timed"),
			Self::Plain(_) => f.write_str("Action::Plain"),
		}
	}
}

/// Adapter that lets a single closure take part in the cycle as an entity.
///
/// Bound to one phase at construction. The scheduler references it weakly, so
/// the adapter leaves the cycle when its last `Arc` is dropped.
pub struct LoopAction {
	phase: Phase,
	scheduler: WeakScheduler,
	action: RwLock<Option<Action>>,
	on_remove: Mutex<Option<RemoveHook>>,
}

impl LoopAction {
	/// Creates an adapter and registers it in `phase`.
	pub fn new(scheduler: &Scheduler, phase: Phase, action: Action) -> Arc<Self> {
		let this = Self::detached(scheduler, phase, action);
		this.enable();
		this
	}

	/// Creates an adapter without registering it.
	pub fn detached(scheduler: &Scheduler, phase: Phase, action: Action) -> Arc<Self> {
		Arc::new(Self::build(scheduler, phase, Some(action)))
	}

	/// Creates an unregistered adapter with no callback yet.
	pub fn unset(scheduler: &Scheduler, phase: Phase) -> Arc<Self> {
		Arc::new(Self::build(scheduler, phase, None))
	}

	fn build(scheduler: &Scheduler, phase: Phase, action: Option<Action>) -> Self {
		Self {
			phase,
			scheduler: scheduler.downgrade(),
			action: RwLock::new(action),
			on_remove: Mutex::new(None),
		}
	}

	pub fn phase(&self) -> Phase {
		self.phase
	}

	pub fn has_action(&self) -> bool {
		self.action.read().is_some()
	}

	/// Runs the callback once.
	///
	/// # Errors
	///
	/// Returns [`ScheduleError::MissingAction`] if no callback was set.
	pub fn invoke(&self, elapsed: f32) -> Result<(), ScheduleError> {
		// Cloned out so the callback may replace itself.
		let action = self.action.read().clone().ok_or(ScheduleError::MissingAction { phase: self.phase })?;
		action.call(elapsed);
		Ok(())
	}

	/// Replaces the callback from the next invocation on.
	pub fn set_action(&self, action: Action) {
		*self.action.write() = Some(action);
	}

	/// Sets a hook run once, before deregistration, on the first removal.
	pub fn on_remove(&self, hook: impl FnOnce() + Send + 'static) {
		*self.on_remove.lock() = Some(Box::new(hook));
	}

	/// Registers into the bound phase without touching the removal hook.
	pub fn enable(self: &Arc<Self>) {
		if let Some(scheduler) = self.scheduler.upgrade() {
			scheduler.add_to_phase(self.phase, self);
		}
	}

	/// Deregisters from the bound phase without running the removal hook.
	pub fn disable(self: &Arc<Self>) {
		if let Some(scheduler) = self.scheduler.upgrade() {
			scheduler.remove_from_phase(self.phase, self);
		}
	}

	/// Runs the removal hook, then deregisters from every phase.
	pub fn remove_from_cycle(self: &Arc<Self>) {
		self.run_remove_hook();
		if let Some(scheduler) = self.scheduler.upgrade() {
			scheduler.remove_from_cycle(self);
		}
	}

	/// Runs the removal hook, then deregisters from `phase` only.
	pub fn remove_from_phase(self: &Arc<Self>, phase: Phase) {
		self.run_remove_hook();
		if let Some(scheduler) = self.scheduler.upgrade() {
			scheduler.remove_from_phase(phase, self);
		}
	}

	fn run_remove_hook(&self) {
		let hook = self.on_remove.lock().take();
		if let Some(hook) = hook {
			hook();
		}
	}
}

impl fmt::Debug for LoopAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoopAction")
			.field("phase", &self.phase)
			.field("action", &*self.action.read())
			.field("has_remove_hook", &self.on_remove.lock().is_some())
			.finish()
	}
}

impl Schedulable for LoopAction {
	fn on_update(&self, elapsed: f32) -> EntityResult {
		Ok(self.invoke(elapsed)?)
	}

	fn on_fixed_update(&self, elapsed: f32) -> EntityResult {
		Ok(self.invoke(elapsed)?)
	}

	fn on_late_update(&self, elapsed: f32) -> EntityResult {
		Ok(self.invoke(elapsed)?)
	}

	fn on_late_fixed_update(&self, elapsed: f32) -> EntityResult {
		Ok(self.invoke(elapsed)?)
	}

	fn on_tick(&self, elapsed: f32) -> EntityResult {
		Ok(self.invoke(elapsed)?)
	}

	fn label(&self) -> Cow<'static, str> {
		Cow::Owned(format!("loop_action:{}", self.phase))
	}
}
