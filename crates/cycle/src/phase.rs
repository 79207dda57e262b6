use std::fmt;

/// A named recurring point in the host frame cycle.
///
/// The vocabulary is closed: every phase has exactly one subscriber lane and
/// one dispatch loop per scheduler generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
	/// Once per rendered frame.
	Update,
	/// Once per fixed simulation step.
	FixedUpdate,
	/// Once per frame, after every `Update` subscriber ran.
	LateUpdate,
	/// Once per fixed step, after every `FixedUpdate` subscriber ran.
	LateFixedUpdate,
	/// Low-frequency tick on a fixed wall-clock interval.
	Tick,
}

impl Phase {
	/// Number of phases.
	pub const COUNT: usize = 5;

	/// Every phase in declaration order.
	pub const ALL: [Phase; Self::COUNT] = [Self::Update, Self::FixedUpdate, Self::LateUpdate, Self::LateFixedUpdate, Self::Tick];

	/// Stable lowercase name used in logs and task names.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Update => "update",
			Self::FixedUpdate => "fixed_update",
			Self::LateUpdate => "late_update",
			Self::LateFixedUpdate => "late_fixed_update",
			Self::Tick => "tick",
		}
	}

	/// Returns the bitflag for this phase.
	pub const fn set(self) -> PhaseSet {
		match self {
			Self::Update => PhaseSet::UPDATE,
			Self::FixedUpdate => PhaseSet::FIXED_UPDATE,
			Self::LateUpdate => PhaseSet::LATE_UPDATE,
			Self::LateFixedUpdate => PhaseSet::LATE_FIXED_UPDATE,
			Self::Tick => PhaseSet::TICK,
		}
	}

	pub(crate) const fn index(self) -> usize {
		self as usize
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

bitflags::bitflags! {
	/// A set of phases, used to register one entity into several lanes at once.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct PhaseSet: u8 {
		const UPDATE = 1 << 0;
		const FIXED_UPDATE = 1 << 1;
		const LATE_UPDATE = 1 << 2;
		const LATE_FIXED_UPDATE = 1 << 3;
		const TICK = 1 << 4;
	}
}

impl PhaseSet {
	/// Iterates the contained phases in declaration order.
	pub fn phases(self) -> impl Iterator<Item = Phase> {
		Phase::ALL.into_iter().filter(move |phase| self.contains(phase.set()))
	}
}

impl From<Phase> for PhaseSet {
	fn from(phase: Phase) -> Self {
		phase.set()
	}
}

impl FromIterator<Phase> for PhaseSet {
	fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
		let mut set = PhaseSet::empty();
		for phase in iter {
			set |= phase.set();
		}
		set
	}
}
