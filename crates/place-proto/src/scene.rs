//! The wire representation of scene-graph state and its deltas.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::ids::{ClientId, ComponentTypeId, EntityId, StateRevision};

/// Immutable once created: the identity of an entity and who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityData {
	pub id: EntityId,
	pub owner_client_id: ClientId,
}

/// An immutable snapshot of the whole place at a given revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceContents {
	pub revision: StateRevision,
	pub entities: HashMap<EntityId, EntityData>,
	pub components: HashMap<ComponentTypeId, HashMap<EntityId, Component>>,
}

impl PlaceContents {
	/// The empty place at revision 0.
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn component(&self, type_id: &ComponentTypeId, entity: &EntityId) -> Option<&Component> {
		self.components.get(type_id)?.get(entity)
	}
}

/// A single, atomic change to the scene graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaceChange {
	EntityAdded(EntityData),
	EntityRemoved(EntityData),
	ComponentAdded(EntityId, Component),
	ComponentUpdated(EntityId, Component),
	ComponentRemoved(EntityData, Component),
}

/// An ordered batch of [`PlaceChange`]s taking the place from `from_revision`
/// to `to_revision`, where `to_revision = from_revision + 1`.
///
/// Emission order within `changes` is always: entity-added, then
/// entity-removed, then component changes. This ordering is an externally
/// visible contract: receivers resolve component references against known
/// entities, so entities must already exist (or not yet have been removed)
/// by the time their components are touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceChangeSet {
	pub from_revision: StateRevision,
	pub to_revision: StateRevision,
	pub changes: Vec<PlaceChange>,
}

impl PlaceChangeSet {
	pub fn empty_tick(revision: StateRevision) -> Self {
		Self {
			from_revision: revision,
			to_revision: revision + 1,
			changes: Vec::new(),
		}
	}
}

/// Unreliable per-client keepalive carrying the latest revision the client
/// has successfully applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
	pub ack_state_rev: StateRevision,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn empty_tick_advances_by_one() {
		let cs = PlaceChangeSet::empty_tick(5);
		assert_eq!(cs.from_revision, 5);
		assert_eq!(cs.to_revision, 6);
		assert!(cs.changes.is_empty());
	}
}
