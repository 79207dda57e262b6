use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::*;
use crate::entity::{EntityResult, ScheduleExt, Schedulable};
use crate::error::FaultKind;
use crate::signal::FrameDriver;

const DT: f32 = 1.0 / 60.0;

fn driven() -> (Arc<FrameDriver>, Scheduler) {
	let driver = Arc::new(FrameDriver::new());
	let scheduler = Scheduler::new(driver.clone(), SchedulerSpec::default().signal_tick());
	(driver, scheduler)
}

#[derive(Default)]
struct Counter {
	hits: AtomicUsize,
}

impl Counter {
	fn hits(&self) -> usize {
		self.hits.load(Ordering::SeqCst)
	}
}

impl Schedulable for Counter {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		self.hits.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn on_tick(&self, _elapsed: f32) -> EntityResult {
		self.hits.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

#[derive(Default)]
struct Failing {
	attempts: AtomicUsize,
}

impl Schedulable for Failing {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		self.attempts.fetch_add(1, Ordering::SeqCst);
		anyhow::bail!("update refused")
	}

	fn label(&self) -> std::borrow::Cow<'static, str> {
		"failing".into()
	}
}

struct Panicking;

impl Schedulable for Panicking {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		panic!("kaboom");
	}
}

struct Flagged {
	alive: AtomicBool,
	hits: AtomicUsize,
}

impl Schedulable for Flagged {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		self.hits.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn is_alive(&self) -> bool {
		self.alive.load(Ordering::SeqCst)
	}
}

struct Log {
	id: usize,
	seen: Arc<parking_lot::Mutex<Vec<(usize, Phase, f32)>>>,
}

impl Log {
	fn push(&self, phase: Phase, elapsed: f32) -> EntityResult {
		self.seen.lock().push((self.id, phase, elapsed));
		Ok(())
	}
}

impl Schedulable for Log {
	fn on_update(&self, elapsed: f32) -> EntityResult {
		self.push(Phase::Update, elapsed)
	}

	fn on_fixed_update(&self, elapsed: f32) -> EntityResult {
		self.push(Phase::FixedUpdate, elapsed)
	}

	fn on_late_update(&self, elapsed: f32) -> EntityResult {
		self.push(Phase::LateUpdate, elapsed)
	}

	fn on_late_fixed_update(&self, elapsed: f32) -> EntityResult {
		self.push(Phase::LateFixedUpdate, elapsed)
	}
}

#[tokio::test]
async fn registration_is_idempotent_per_phase() {
	let (_driver, scheduler) = driven();
	let counter = Arc::new(Counter::default());

	for phase in Phase::ALL {
		scheduler.add_to_phase(phase, &counter);
		assert!(scheduler.contains(phase, &counter));
		scheduler.add_to_phase(phase, &counter);
		assert_eq!(scheduler.subscriber_count(phase), 1);
	}
}

#[tokio::test]
async fn removing_absent_entity_is_noop() {
	let (_driver, scheduler) = driven();
	let present = Arc::new(Counter::default());
	let absent = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &present);

	for phase in Phase::ALL {
		scheduler.remove_from_phase(phase, &absent);
	}
	scheduler.remove_from_cycle(&absent);
	assert_eq!(scheduler.subscriber_count(Phase::Update), 1);
	assert!(scheduler.contains(Phase::Update, &present));
}

#[tokio::test]
async fn cycle_and_set_registration() {
	let (_driver, scheduler) = driven();
	let everywhere = Arc::new(Counter::default());
	let some = Arc::new(Counter::default());

	everywhere.add_to_cycle(&scheduler);
	some.add_to_phases(&scheduler, PhaseSet::UPDATE | PhaseSet::TICK);

	for phase in Phase::ALL {
		assert!(scheduler.contains(phase, &everywhere));
		assert_eq!(scheduler.contains(phase, &some), matches!(phase, Phase::Update | Phase::Tick));
	}

	everywhere.remove_from_phase(&scheduler, Phase::Tick);
	assert!(!scheduler.contains(Phase::Tick, &everywhere));
	everywhere.remove_from_cycle(&scheduler);
	assert!(Phase::ALL.iter().all(|p| !scheduler.contains(*p, &everywhere)));

	scheduler.remove_from_phases(PhaseSet::TICK, &some);
	assert!(scheduler.contains(Phase::Update, &some));
	assert!(!scheduler.contains(Phase::Tick, &some));
}

#[tokio::test]
async fn dispatch_follows_registration_order_and_host_phase_order() {
	let (driver, scheduler) = driven();
	let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
	let first = Arc::new(Log { id: 1, seen: Arc::clone(&seen) });
	let second = Arc::new(Log { id: 2, seen: Arc::clone(&seen) });
	scheduler.add_to_cycle(&first);
	scheduler.add_to_cycle(&second);

	driver.frame(DT, 0.02).await;

	assert_eq!(
		*seen.lock(),
		vec![
			(1, Phase::FixedUpdate, 0.02),
			(2, Phase::FixedUpdate, 0.02),
			(1, Phase::LateFixedUpdate, 0.02),
			(2, Phase::LateFixedUpdate, 0.02),
			(1, Phase::Update, DT),
			(2, Phase::Update, DT),
			(1, Phase::LateUpdate, DT),
			(2, Phase::LateUpdate, DT),
		]
	);
}

#[tokio::test]
async fn failing_entity_is_isolated_and_retried() {
	let (driver, scheduler) = driven();
	let before = Arc::new(Counter::default());
	let failing = Arc::new(Failing::default());
	let after = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &before);
	scheduler.add_to_phase(Phase::Update, &failing);
	scheduler.add_to_phase(Phase::Update, &after);
	let mut faults = scheduler.subscribe_faults();

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!((before.hits(), failing.attempts.load(Ordering::SeqCst), after.hits()), (1, 1, 1));

	let report = faults.try_recv().expect("fault report");
	assert_eq!(report.phase, Phase::Update);
	assert_eq!(report.entity, "failing");
	assert_eq!(report.kind, FaultKind::Failed);
	assert_eq!(report.message, "update refused");
	assert_eq!(report.generation, scheduler.generation());

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!((before.hits(), failing.attempts.load(Ordering::SeqCst), after.hits()), (2, 2, 2));
	assert_eq!(scheduler.subscriber_count(Phase::Update), 3, "faults must not evict");
	assert_eq!(scheduler.record(Phase::Update).faults, 2);
}

#[tokio::test]
async fn panicking_entity_is_isolated() {
	let (driver, scheduler) = driven();
	let panicking = Arc::new(Panicking);
	let counter = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &panicking);
	scheduler.add_to_phase(Phase::Update, &counter);
	let mut faults = scheduler.subscribe_faults();

	assert!(driver.step(Phase::Update, DT).await);
	assert!(driver.step(Phase::Update, DT).await);

	assert_eq!(counter.hits(), 2);
	let report = faults.try_recv().expect("fault report");
	assert_eq!(report.kind, FaultKind::Panicked);
	assert_eq!(report.message, "kaboom");
	assert!(report.trace.is_none());
	assert!(scheduler.contains(Phase::Update, &panicking));
}

#[tokio::test]
async fn dropped_entity_is_skipped_then_purged() {
	let (driver, scheduler) = driven();
	let keep = Arc::new(Counter::default());
	let doomed = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &doomed);
	scheduler.add_to_phase(Phase::Update, &keep);

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(doomed.hits(), 1);
	drop(doomed);

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(keep.hits(), 2);
	assert_eq!(scheduler.subscriber_count(Phase::Update), 2, "purge is deferred one pass");

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(scheduler.subscriber_count(Phase::Update), 1);
	assert_eq!(scheduler.record(Phase::Update).purged, 1);
	assert_eq!(keep.hits(), 3);
}

#[tokio::test]
async fn host_liveness_predicate_stops_invocation() {
	let (driver, scheduler) = driven();
	let flagged = Arc::new(Flagged {
		alive: AtomicBool::new(true),
		hits: AtomicUsize::new(0),
	});
	scheduler.add_to_phase(Phase::Update, &flagged);

	assert!(driver.step(Phase::Update, DT).await);
	flagged.alive.store(false, Ordering::SeqCst);
	assert!(driver.step(Phase::Update, DT).await);
	assert!(driver.step(Phase::Update, DT).await);

	assert_eq!(flagged.hits.load(Ordering::SeqCst), 1);
	assert!(!scheduler.contains(Phase::Update, &flagged));
}

struct Spawner {
	scheduler: Scheduler,
	child: Arc<Counter>,
}

impl Schedulable for Spawner {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		self.scheduler.add_to_phase(Phase::Update, &self.child);
		Ok(())
	}
}

#[tokio::test]
async fn entity_added_mid_pass_runs_next_pass() {
	let (driver, scheduler) = driven();
	let spawner = Arc::new(Spawner {
		scheduler: scheduler.clone(),
		child: Arc::new(Counter::default()),
	});
	scheduler.add_to_phase(Phase::Update, &spawner);

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(spawner.child.hits(), 0);
	assert!(scheduler.contains(Phase::Update, &spawner.child));

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(spawner.child.hits(), 1);
}

#[tokio::test]
async fn pause_suppresses_every_phase_without_catch_up() {
	let (driver, scheduler) = driven();
	let counter = Arc::new(Counter::default());
	scheduler.add_to_cycle(&counter);
	let mut events = scheduler.subscribe_pause();

	scheduler.pause();
	scheduler.pause();
	assert!(scheduler.is_paused());
	assert_eq!(events.try_recv(), Ok(PauseEvent::Paused));
	assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

	assert!(driver.step(Phase::Update, DT).await);
	assert!(driver.step(Phase::Tick, 0.05).await);
	assert_eq!(counter.hits(), 0);
	assert_eq!(scheduler.record(Phase::Update).passes, 1, "paused loops still wake");

	scheduler.resume();
	assert_eq!(events.try_recv(), Ok(PauseEvent::Resumed));
	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(counter.hits(), 1);
}

#[tokio::test]
async fn reset_drops_registrations_and_restarts_loops() {
	let (driver, scheduler) = driven();
	let old = Arc::new(Counter::default());
	scheduler.add_to_cycle(&old);
	let mut pause_events = scheduler.subscribe_pause();
	assert_eq!(scheduler.generation(), 1);

	scheduler.pause();
	scheduler.reset();
	assert_eq!(scheduler.generation(), 2);
	assert!(scheduler.is_paused(), "pause flag survives reset");
	scheduler.resume();

	for phase in Phase::ALL {
		assert_eq!(scheduler.subscriber_count(phase), 0);
	}
	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(old.hits(), 0);

	let fresh = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &fresh);
	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(fresh.hits(), 1);
	assert_eq!(old.hits(), 0);

	assert_eq!(pause_events.recv().await, Ok(PauseEvent::Paused));
	assert_eq!(pause_events.recv().await, Err(RecvError::Closed));
}

#[tokio::test]
async fn shutdown_cancels_every_loop() {
	let (_driver, scheduler) = driven();
	let exits = scheduler.shutdown().await;
	assert_eq!(exits.iter().map(|(phase, _)| *phase).collect::<Vec<_>>(), Phase::ALL.to_vec());
	assert!(exits.iter().all(|(_, exit)| *exit == LoopExit::Cancelled));
}

#[tokio::test]
async fn closed_signal_ends_loops() {
	let (driver, scheduler) = driven();
	driver.close();
	// Give the loops a chance to observe the closed signal before cancelling.
	tokio::time::sleep(Duration::from_millis(20)).await;
	let exits = scheduler.shutdown().await;
	assert!(exits.iter().all(|(_, exit)| *exit == LoopExit::SignalClosed), "{exits:?}");
}

#[tokio::test(start_paused = true)]
async fn interval_tick_runs_without_host_signal() {
	let driver = Arc::new(FrameDriver::new());
	let scheduler = Scheduler::new(driver, SchedulerSpec::default().tick_interval(Duration::from_millis(10)));
	let counter = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Tick, &counter);

	tokio::time::sleep(Duration::from_millis(35)).await;
	let hits = counter.hits();
	assert!((2..=3).contains(&hits), "expected ~3 ticks, got {hits}");
	assert_eq!(scheduler.record(Phase::Tick).passes as usize, hits);
}

#[tokio::test]
async fn snapshot_reports_every_phase() {
	let (driver, scheduler) = driven();
	let counter = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &counter);
	assert!(driver.step(Phase::Update, DT).await);

	let records = scheduler.snapshot();
	assert_eq!(records.len(), Phase::COUNT);
	let update = &records[Phase::Update.index()];
	assert_eq!(
		*update,
		PhaseRecord {
			phase: Phase::Update,
			generation: 1,
			subscribers: 1,
			passes: 1,
			invocations: 1,
			faults: 0,
			purged: 0,
		}
	);
	assert_eq!(records[Phase::Tick.index()].passes, 0);
}

#[tokio::test]
async fn dropping_last_handle_cancels_loops() {
	let (_driver, scheduler) = driven();
	let mut events = scheduler.subscribe_pause();
	let weak = scheduler.downgrade();
	drop(scheduler);

	assert!(weak.upgrade().is_none());
	assert_eq!(events.recv().await, Err(RecvError::Closed));
}

#[tokio::test]
async fn erased_handles_register_like_concrete_ones() {
	let (driver, scheduler) = driven();
	let counter = Arc::new(Counter::default());
	let erased: Arc<dyn Schedulable> = counter.clone();
	scheduler.add_to_phase(Phase::Update, &erased);
	scheduler.add_to_phase(Phase::Update, &counter);

	assert_eq!(scheduler.subscriber_count(Phase::Update), 1);
	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(counter.hits(), 1);
}

struct Evictor {
	scheduler: Scheduler,
	victim: Arc<Counter>,
	hits: AtomicUsize,
}

impl Schedulable for Evictor {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		self.hits.fetch_add(1, Ordering::SeqCst);
		self.scheduler.remove_from_phase(Phase::Update, &self.victim);
		Ok(())
	}
}

struct Quitter {
	scheduler: Scheduler,
	this: Weak<Quitter>,
	hits: AtomicUsize,
}

impl Schedulable for Quitter {
	fn on_update(&self, _elapsed: f32) -> EntityResult {
		self.hits.fetch_add(1, Ordering::SeqCst);
		if let Some(this) = self.this.upgrade() {
			self.scheduler.remove_from_phase(Phase::Update, &this);
		}
		Ok(())
	}
}

#[tokio::test]
async fn entity_removing_a_later_neighbour_mid_pass() {
	let (driver, scheduler) = driven();
	let victim = Arc::new(Counter::default());
	let evictor = Arc::new(Evictor {
		scheduler: scheduler.clone(),
		victim: Arc::clone(&victim),
		hits: AtomicUsize::new(0),
	});
	let after = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &evictor);
	scheduler.add_to_phase(Phase::Update, &victim);
	scheduler.add_to_phase(Phase::Update, &after);

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!((evictor.hits.load(Ordering::SeqCst), victim.hits(), after.hits()), (1, 0, 1));
	assert!(!scheduler.contains(Phase::Update, &victim));

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!((evictor.hits.load(Ordering::SeqCst), victim.hits(), after.hits()), (2, 0, 2));
	assert_eq!(scheduler.record(Phase::Update).faults, 0);
}

#[tokio::test]
async fn entity_removing_itself_mid_pass() {
	let (driver, scheduler) = driven();
	let before = Arc::new(Counter::default());
	let quitter = Arc::new_cyclic(|this| Quitter {
		scheduler: scheduler.clone(),
		this: this.clone(),
		hits: AtomicUsize::new(0),
	});
	scheduler.add_to_phase(Phase::Update, &before);
	scheduler.add_to_phase(Phase::Update, &quitter);

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(quitter.hits.load(Ordering::SeqCst), 1);
	assert!(!scheduler.contains(Phase::Update, &quitter));

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!((before.hits(), quitter.hits.load(Ordering::SeqCst)), (2, 1));
	assert_eq!(scheduler.subscriber_count(Phase::Update), 1);
	assert_eq!(scheduler.record(Phase::Update).faults, 0);
}

#[tokio::test]
async fn step_after_shutdown_reports_not_run() {
	let (driver, scheduler) = driven();
	scheduler.shutdown().await;

	for phase in Phase::ALL {
		assert_eq!(driver.listeners(phase), 0);
		assert!(!driver.step(phase, DT).await);
	}
}

#[tokio::test]
async fn step_after_last_handle_dropped_reports_not_run() {
	let (driver, scheduler) = driven();
	drop(scheduler);
	assert!(!driver.step(Phase::Update, DT).await);
	driver.frame(DT, 0.02).await;
}

#[tokio::test]
async fn reset_keeps_one_listener_per_phase() {
	let (driver, scheduler) = driven();
	scheduler.reset();
	let counter = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Update, &counter);

	assert!(driver.step(Phase::Update, DT).await);
	assert_eq!(counter.hits(), 1);
	tokio::task::yield_now().await;
	assert_eq!(driver.listeners(Phase::Update), 1);
}

#[test]
fn default_spec_scheduler_runs_outside_a_runtime() {
	let scheduler = Scheduler::new(Arc::new(FrameDriver::new()), SchedulerSpec::default());
	let counter = Arc::new(Counter::default());
	scheduler.add_to_phase(Phase::Tick, &counter);

	let deadline = std::time::Instant::now() + Duration::from_secs(2);
	while counter.hits() == 0 && std::time::Instant::now() < deadline {
		std::thread::sleep(Duration::from_millis(10));
	}
	assert!(counter.hits() > 0, "interval tick runs on the shared worker runtime");

	scheduler.reset();
	assert_eq!(scheduler.generation(), 2);
	drop(scheduler);
}
