//! The revisioned Entity-Component store: delta generation, bounded
//! history, and coalesced observer fan-out.

mod apply;
mod diff;
mod events;

pub use events::SceneEvent;

use std::collections::VecDeque;

use place_proto::{PlaceChange, PlaceChangeSet, PlaceContents, StateRevision};
use tokio::sync::broadcast;

const HISTORY_CAP: usize = 100;
const EVENTS_CAP: usize = 1024;

pub struct SceneStore {
	current: PlaceContents,
	/// Past snapshots, including the one equal to `current`. The base
	/// (revision 0, the empty place) is always retrievable via
	/// [`SceneStore::snapshot_at`] regardless of whether it has fallen out
	/// of this bounded window.
	history: VecDeque<PlaceContents>,
	pending: Vec<PlaceChange>,
	events: broadcast::Sender<SceneEvent>,
}

impl Default for SceneStore {
	fn default() -> Self {
		Self::new()
	}
}

impl SceneStore {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(EVENTS_CAP);
		Self {
			current: PlaceContents::empty(),
			history: VecDeque::new(),
			pending: Vec::new(),
			events,
		}
	}

	pub fn current(&self) -> &PlaceContents {
		&self.current
	}

	pub fn revision(&self) -> StateRevision {
		self.current.revision
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SceneEvent> {
		self.events.subscribe()
	}

	/// Enqueues changes to be applied at the next [`SceneStore::tick`].
	pub fn append(&mut self, changes: impl IntoIterator<Item = PlaceChange>) {
		self.pending.extend(changes);
	}

	/// Atomically applies the buffered changes, advancing the revision by
	/// exactly one and returning the resulting [`PlaceChangeSet`].
	///
	/// # Panics
	/// Panics if the buffered changes are internally inconsistent (an
	/// update/remove targeting a component that was never added). Callers
	/// are expected to only ever buffer changes already validated by the
	/// interaction router, so reaching this is a server bug, not a
	/// reachable client-triggerable condition.
	pub fn tick(&mut self) -> PlaceChangeSet {
		let change_set = PlaceChangeSet {
			from_revision: self.current.revision,
			to_revision: self.current.revision + 1,
			changes: std::mem::take(&mut self.pending),
		};

		let new_current = apply::apply(&self.current, &change_set)
			.expect("scene store change buffer was internally inconsistent");

		for change in &change_set.changes {
			for event in events::events_for_change(change) {
				// No receivers is fine; nothing to observe this tick.
				let _ = self.events.send(event);
			}
		}

		self.current = new_current;
		self.history.push_back(self.current.clone());
		while self.history.len() > HISTORY_CAP {
			self.history.pop_front();
		}

		change_set
	}

	/// Returns the historical snapshot at `revision`, the synthesized empty
	/// snapshot for revision 0, or `None` if it has been evicted from
	/// history.
	pub fn snapshot_at(&self, revision: StateRevision) -> Option<PlaceContents> {
		if revision == 0 {
			return Some(PlaceContents::empty());
		}
		self.history
			.iter()
			.find(|snapshot| snapshot.revision == revision)
			.cloned()
	}

	/// Computes the minimal change set from `from` to the current state.
	pub fn diff(&self, from: &PlaceContents) -> PlaceChangeSet {
		diff::diff(from, &self.current)
	}

	/// Convenience for the Orchestrator's ack-driven broadcast: diffs from
	/// the client's last-acked revision, or from the empty snapshot if the
	/// client never acked or the ack has fallen out of history.
	pub fn diff_since_ack(&self, acked: Option<StateRevision>) -> PlaceChangeSet {
		let base = acked
			.and_then(|rev| self.snapshot_at(rev))
			.unwrap_or_else(PlaceContents::empty);
		self.diff(&base)
	}
}
