use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::phase::Phase;

/// Host integration point that suspends a dispatch loop until the next
/// occurrence of its phase.
#[async_trait]
pub trait PhaseSignal: Send + Sync + 'static {
	/// Waits for the next occurrence of `phase`.
	///
	/// Returns `None` once the source is closed; the loop then exits. Must be
	/// cancel-safe: dropping the future must not lose an occurrence.
	async fn wait(&self, phase: Phase) -> Option<Wake>;

	/// A dispatch loop for `phase` started listening.
	fn attach(&self, _phase: Phase) {}

	/// A dispatch loop for `phase` stopped for good. Paired with one earlier
	/// [`attach`](Self::attach).
	fn detach(&self, _phase: Phase) {}
}

/// One occurrence of a phase.
#[derive(Debug)]
pub struct Wake {
	elapsed: f32,
	done: Option<oneshot::Sender<()>>,
}

impl Wake {
	pub fn new(elapsed: f32) -> Self {
		Self { elapsed, done: None }
	}

	/// Creates a wake whose `done` sender fires once the pass has run.
	pub fn with_completion(elapsed: f32, done: oneshot::Sender<()>) -> Self {
		Self { elapsed, done: Some(done) }
	}

	/// Seconds since the previous occurrence of the phase.
	pub fn elapsed(&self) -> f32 {
		self.elapsed
	}

	pub(crate) fn complete(mut self) {
		if let Some(done) = self.done.take() {
			let _ = done.send(());
		}
	}
}

struct Pulse {
	elapsed: f32,
	done: Option<oneshot::Sender<()>>,
}

struct DriverLane {
	tx: mpsc::UnboundedSender<Pulse>,
	rx: Mutex<mpsc::UnboundedReceiver<Pulse>>,
	/// Attached dispatch loops.
	listeners: watch::Sender<usize>,
}

impl DriverLane {
	fn new() -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			tx,
			rx: Mutex::new(rx),
			listeners: watch::Sender::new(0),
		}
	}

	/// Drops queued pulses nobody will run, releasing their `step` callers.
	fn drain(&self) {
		if let Ok(mut rx) = self.rx.try_lock() {
			let mut dropped = 0usize;
			while rx.try_recv().is_ok() {
				dropped += 1;
			}
			if dropped > 0 {
				tracing::trace!(dropped, "cycle.driver.drain");
			}
		}
	}
}

/// In-process [`PhaseSignal`] driven explicitly by the host main loop.
///
/// Each phase has its own queue, so every fired occurrence produces exactly one
/// pass. [`step`](Self::step) additionally waits until that pass finished,
/// which keeps host frames and dispatch passes in lock-step.
pub struct FrameDriver {
	lanes: [DriverLane; Phase::COUNT],
	closed: CancellationToken,
}

impl Default for FrameDriver {
	fn default() -> Self {
		Self::new()
	}
}

impl FrameDriver {
	pub fn new() -> Self {
		Self {
			lanes: std::array::from_fn(|_| DriverLane::new()),
			closed: CancellationToken::new(),
		}
	}

	/// Fires one occurrence of `phase` without waiting for the pass.
	pub fn pulse(&self, phase: Phase, elapsed: f32) {
		let _ = self.lanes[phase.index()].tx.send(Pulse { elapsed, done: None });
	}

	/// Fires one occurrence of `phase` and waits until a dispatch loop ran it.
	///
	/// Returns `false` if the driver is closed, no loop is attached to `phase`,
	/// or the loop dropped the occurrence because it was cancelled.
	pub async fn step(&self, phase: Phase, elapsed: f32) -> bool {
		if self.closed.is_cancelled() {
			return false;
		}
		let lane = &self.lanes[phase.index()];
		let mut listeners = lane.listeners.subscribe();
		if *listeners.borrow_and_update() == 0 {
			return false;
		}

		let (done, ran) = oneshot::channel();
		if lane.tx.send(Pulse { elapsed, done: Some(done) }).is_err() {
			return false;
		}
		let ran = tokio::select! {
			biased;
			ran = ran => ran.is_ok(),
			_ = listeners.wait_for(|count| *count == 0) => false,
		};
		if !ran {
			lane.drain();
		}
		ran
	}

	/// Dispatch loops currently attached to `phase`.
	pub fn listeners(&self, phase: Phase) -> usize {
		*self.lanes[phase.index()].listeners.borrow()
	}

	/// Runs one host frame: the fixed phases with `fixed_delta`, then the
	/// frame phases with `delta`.
	pub async fn frame(&self, delta: f32, fixed_delta: f32) {
		self.step(Phase::FixedUpdate, fixed_delta).await;
		self.step(Phase::LateFixedUpdate, fixed_delta).await;
		self.step(Phase::Update, delta).await;
		self.step(Phase::LateUpdate, delta).await;
	}

	/// Closes every phase; waiting loops exit.
	pub fn close(&self) {
		self.closed.cancel();
	}

	pub fn is_closed(&self) -> bool {
		self.closed.is_cancelled()
	}
}

#[async_trait]
impl PhaseSignal for FrameDriver {
	async fn wait(&self, phase: Phase) -> Option<Wake> {
		let mut rx = self.lanes[phase.index()].rx.lock().await;
		tokio::select! {
			biased;
			_ = self.closed.cancelled() => None,
			pulse = rx.recv() => pulse.map(|pulse| Wake {
				elapsed: pulse.elapsed,
				done: pulse.done,
			}),
		}
	}

	fn attach(&self, phase: Phase) {
		self.lanes[phase.index()].listeners.send_modify(|count| *count += 1);
	}

	fn detach(&self, phase: Phase) {
		let lane = &self.lanes[phase.index()];
		let mut remaining = 0;
		lane.listeners.send_modify(|count| {
			*count = count.saturating_sub(1);
			remaining = *count;
		});
		if remaining == 0 {
			lane.drain();
		}
	}
}
