use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::entity::Schedulable;
use crate::phase::Phase;

/// Upgrades a subscriber if it is still alive.
pub(super) fn live(entry: &Weak<dyn Schedulable>) -> Option<Arc<dyn Schedulable>> {
	entry.upgrade().filter(|entity| entity.is_alive())
}

/// Ordered, duplicate-free subscriber list for one phase of one generation.
///
/// The lock is only held to read one slot or to mutate the list, never while
/// an entity runs, so entities may call back into the registration API.
pub(crate) struct Lane {
	phase: Phase,
	subscribers: Mutex<Vec<Weak<dyn Schedulable>>>,
	pub(super) passes: AtomicU64,
	pub(super) invocations: AtomicU64,
	pub(super) faults: AtomicU64,
	pub(super) purged: AtomicU64,
}

impl Lane {
	pub(super) fn new(phase: Phase) -> Self {
		Self {
			phase,
			subscribers: Mutex::new(Vec::new()),
			passes: AtomicU64::new(0),
			invocations: AtomicU64::new(0),
			faults: AtomicU64::new(0),
			purged: AtomicU64::new(0),
		}
	}

	pub(super) fn phase(&self) -> Phase {
		self.phase
	}

	/// Appends `entity` unless it is already present.
	pub(super) fn insert(&self, entity: Weak<dyn Schedulable>) -> bool {
		let mut subscribers = self.subscribers.lock();
		if subscribers.iter().any(|e| Weak::ptr_eq(e, &entity)) {
			return false;
		}
		subscribers.push(entity);
		true
	}

	/// Removes `entity` keeping the order of the others.
	pub(super) fn remove(&self, entity: &Weak<dyn Schedulable>) -> bool {
		let mut subscribers = self.subscribers.lock();
		let Some(index) = subscribers.iter().position(|e| Weak::ptr_eq(e, entity)) else {
			return false;
		};
		subscribers.remove(index);
		true
	}

	pub(super) fn contains(&self, entity: &Weak<dyn Schedulable>) -> bool {
		self.subscribers.lock().iter().any(|e| Weak::ptr_eq(e, entity))
	}

	pub(super) fn len(&self) -> usize {
		self.subscribers.lock().len()
	}

	pub(super) fn get(&self, index: usize) -> Option<Weak<dyn Schedulable>> {
		self.subscribers.lock().get(index).cloned()
	}

	pub(super) fn clear(&self) {
		// Dropped outside the lock: a weak ref may free the allocation.
		let _old = std::mem::take(&mut *self.subscribers.lock());
	}

	/// Drops every dead subscriber. Returns how many were removed.
	///
	/// Liveness is evaluated on a snapshot so `is_alive` never runs under the
	/// lane lock.
	pub(super) fn purge(&self) -> usize {
		let snapshot = self.subscribers.lock().clone();
		let dead: Vec<_> = snapshot.into_iter().filter(|entry| live(entry).is_none()).collect();
		if dead.is_empty() {
			return 0;
		}

		let mut subscribers = self.subscribers.lock();
		let before = subscribers.len();
		subscribers.retain(|entry| !dead.iter().any(|d| Weak::ptr_eq(d, entry)));
		let removed = before - subscribers.len();
		drop(subscribers);

		self.purged.fetch_add(removed as u64, Ordering::Relaxed);
		removed
	}
}
