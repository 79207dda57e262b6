use std::time::Duration;

/// Default wall-clock interval between `Tick` passes.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Where the `Tick` phase gets its wake-ups from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
	/// Wake on a fixed wall-clock interval, independent of frame rate.
	/// Missed intervals are skipped, never replayed.
	Interval(Duration),
	/// Wake whenever the phase signal fires [`Phase::Tick`](crate::Phase::Tick).
	Signal,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSpec {
	pub(crate) tick: TickSource,
	pub(crate) fault_buffer: usize,
	pub(crate) pause_buffer: usize,
}

impl SchedulerSpec {
	/// Sets the tick source.
	///
	/// # Panics
	///
	/// Panics if an interval source has a zero period.
	#[must_use]
	pub fn tick(mut self, tick: TickSource) -> Self {
		if let TickSource::Interval(period) = tick {
			assert!(!period.is_zero(), "tick interval must be > 0");
		}
		self.tick = tick;
		self
	}

	/// Ticks on a wall-clock interval.
	///
	/// # Panics
	///
	/// Panics if `period` is zero.
	#[must_use]
	pub fn tick_interval(self, period: Duration) -> Self {
		self.tick(TickSource::Interval(period))
	}

	/// Drives `Tick` from the phase signal like the frame phases.
	#[must_use]
	pub fn signal_tick(self) -> Self {
		self.tick(TickSource::Signal)
	}

	/// Sets the fault report broadcast capacity.
	///
	/// # Panics
	///
	/// Panics if `size` is zero.
	#[must_use]
	pub fn fault_buffer(mut self, size: usize) -> Self {
		assert!(size > 0, "fault buffer size must be > 0");
		self.fault_buffer = size;
		self
	}

	/// Sets the pause event broadcast capacity.
	///
	/// # Panics
	///
	/// Panics if `size` is zero.
	#[must_use]
	pub fn pause_buffer(mut self, size: usize) -> Self {
		assert!(size > 0, "pause buffer size must be > 0");
		self.pause_buffer = size;
		self
	}

	/// Returns the configured tick source.
	pub fn tick_source(&self) -> TickSource {
		self.tick
	}
}

impl Default for SchedulerSpec {
	fn default() -> Self {
		Self {
			tick: TickSource::Interval(DEFAULT_TICK_INTERVAL),
			fault_buffer: 64,
			pause_buffer: 16,
		}
	}
}
