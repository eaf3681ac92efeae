//! Computing the minimal [`PlaceChangeSet`] between two snapshots.

use std::collections::{HashMap, HashSet};

use place_proto::{
	Component, ComponentTypeId, EntityId, PlaceChange, PlaceChangeSet, PlaceContents,
};

/// Computes the change set that takes `from` to `to`.
///
/// Entity set difference yields add/remove. Per component type, per entity:
/// absent->present is Added, present->present with inequality is Updated,
/// present->absent is Removed. A component type whose list became entirely
/// empty still emits removals, because the union of entity keys is taken
/// over both sides' maps for that type rather than just `to`'s. An entity
/// that disappeared between the two snapshots does not also get a
/// `ComponentRemoved` for each of its components: `apply` cascades those away
/// when it processes that entity's `EntityRemoved` (applied first, per the
/// documented change-set order), so emitting them here would make `apply`
/// reject its own output as an update/remove against an already-gone entity.
pub fn diff(from: &PlaceContents, to: &PlaceContents) -> PlaceChangeSet {
	let mut changes = Vec::new();
	let mut removed_entities: HashSet<&EntityId> = HashSet::new();

	for (id, data) in &to.entities {
		if !from.entities.contains_key(id) {
			changes.push(PlaceChange::EntityAdded(data.clone()));
		}
	}
	for (id, data) in &from.entities {
		if !to.entities.contains_key(id) {
			changes.push(PlaceChange::EntityRemoved(data.clone()));
			removed_entities.insert(id);
		}
	}

	let type_ids: HashSet<&ComponentTypeId> =
		from.components.keys().chain(to.components.keys()).collect();
	// Stable order for determinism in tests: sort by type id.
	let mut type_ids: Vec<&ComponentTypeId> = type_ids.into_iter().collect();
	type_ids.sort();

	let empty_map: HashMap<EntityId, Component> = HashMap::new();
	for type_id in type_ids {
		let from_map = from.components.get(type_id).unwrap_or(&empty_map);
		let to_map = to.components.get(type_id).unwrap_or(&empty_map);

		let entity_ids: HashSet<&EntityId> =
			from_map.keys().chain(to_map.keys()).collect();
		let mut entity_ids: Vec<&EntityId> = entity_ids.into_iter().collect();
		entity_ids.sort();

		for entity_id in entity_ids {
			match (from_map.get(entity_id), to_map.get(entity_id)) {
				(None, Some(component)) => {
					changes.push(PlaceChange::ComponentAdded(
						entity_id.clone(),
						component.clone(),
					));
				}
				(Some(old), Some(new)) if old != new => {
					changes.push(PlaceChange::ComponentUpdated(
						entity_id.clone(),
						new.clone(),
					));
				}
				(Some(old), None) => {
					if removed_entities.contains(entity_id) {
						continue;
					}
					let owner = to
						.entities
						.get(entity_id)
						.or_else(|| from.entities.get(entity_id))
						.cloned()
						.expect("component can't outlive its entity's record in both snapshots");
					changes.push(PlaceChange::ComponentRemoved(owner, old.clone()));
				}
				_ => {}
			}
		}
	}

	PlaceChangeSet {
		from_revision: from.revision,
		to_revision: to.revision,
		changes,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use place_proto::{ClientId, EntityData, Mat4};

	fn entity(id: &str, owner: ClientId) -> EntityData {
		EntityData {
			id: EntityId::from(id),
			owner_client_id: owner,
		}
	}

	#[test]
	fn diff_of_identical_snapshots_is_empty() {
		let mut contents = PlaceContents::empty();
		contents.revision = 3;
		let owner = ClientId::random();
		contents.entities.insert(EntityId::from("e1"), entity("e1", owner));
		let result = diff(&contents, &contents);
		assert!(result.changes.is_empty());
		assert_eq!(result.from_revision, 3);
		assert_eq!(result.to_revision, 3);
	}

	#[test]
	fn diff_detects_added_removed_and_updated_components() {
		let owner = ClientId::random();
		let mut from = PlaceContents::empty();
		from.revision = 0;
		from.entities.insert(EntityId::from("stays"), entity("stays", owner));
		from.entities.insert(EntityId::from("removed"), entity("removed", owner));
		from.components
			.entry(ComponentTypeId::new("Transform"))
			.or_default()
			.insert(EntityId::from("stays"), Component::Transform(Mat4::IDENTITY));
		from.components
			.entry(ComponentTypeId::new("Transform"))
			.or_default()
			.insert(EntityId::from("removed"), Component::Transform(Mat4::IDENTITY));

		let mut to = PlaceContents::empty();
		to.revision = 1;
		to.entities.insert(EntityId::from("stays"), entity("stays", owner));
		to.entities.insert(EntityId::from("added"), entity("added", owner));
		let updated_transform = Component::Transform(Mat4([[2.0; 4]; 4]));
		to.components
			.entry(ComponentTypeId::new("Transform"))
			.or_default()
			.insert(EntityId::from("stays"), updated_transform.clone());
		to.components
			.entry(ComponentTypeId::new("Transform"))
			.or_default()
			.insert(EntityId::from("added"), Component::Transform(Mat4::IDENTITY));

		let cs = diff(&from, &to);

		assert!(cs
			.changes
			.iter()
			.any(|c| matches!(c, PlaceChange::EntityAdded(d) if d.id == EntityId::from("added"))));
		assert!(cs
			.changes
			.iter()
			.any(|c| matches!(c, PlaceChange::EntityRemoved(d) if d.id == EntityId::from("removed"))));
		assert!(cs.changes.iter().any(|c| matches!(
			c,
			PlaceChange::ComponentUpdated(id, comp)
			if *id == EntityId::from("stays") && *comp == updated_transform
		)));
		assert!(cs.changes.iter().any(|c| matches!(
			c,
			PlaceChange::ComponentAdded(id, _) if *id == EntityId::from("added")
		)));
		// "removed"'s Transform is not separately emitted as
		// ComponentRemoved: it's already gone once EntityRemoved("removed")
		// is applied, so a redundant ComponentRemoved would make `apply`
		// reject the change set against its own output (see
		// `component_removal_is_skipped_for_an_entity_removed_in_the_same_diff`).
		assert!(!cs.changes.iter().any(|c| matches!(
			c,
			PlaceChange::ComponentRemoved(d, _) if d.id == EntityId::from("removed")
		)));
	}

	#[test]
	fn component_removal_is_skipped_for_an_entity_removed_in_the_same_diff() {
		let owner = ClientId::random();
		let mut from = PlaceContents::empty();
		from.entities.insert(EntityId::from("e1"), entity("e1", owner));
		from.components
			.entry(ComponentTypeId::new("Transform"))
			.or_default()
			.insert(EntityId::from("e1"), Component::Transform(Mat4::IDENTITY));

		let mut to = PlaceContents::empty();
		to.revision = 1;

		let cs = diff(&from, &to);
		assert!(cs
			.changes
			.iter()
			.any(|c| matches!(c, PlaceChange::EntityRemoved(d) if d.id == EntityId::from("e1"))));
		assert!(!cs.changes.iter().any(|c| matches!(c, PlaceChange::ComponentRemoved(..))));

		let rebuilt = super::super::apply::apply(&from, &cs).expect("apply must accept its own diff output");
		assert_eq!(rebuilt.entities, to.entities);
		assert_eq!(rebuilt.components, to.components);
	}

	#[test]
	fn vanished_component_type_still_emits_removals() {
		let owner = ClientId::random();
		let mut from = PlaceContents::empty();
		from.entities.insert(EntityId::from("e1"), entity("e1", owner));
		from.components
			.entry(ComponentTypeId::new("Collision"))
			.or_default()
			.insert(
				EntityId::from("e1"),
				Component::Collision(place_proto::Shape::Sphere { radius: 1.0, mass: 1.0 }),
			);

		let mut to = from.clone();
		to.revision = 1;
		to.components.remove(&ComponentTypeId::new("Collision"));

		let cs = diff(&from, &to);
		assert!(cs.changes.iter().any(|c| matches!(
			c,
			PlaceChange::ComponentRemoved(d, _) if d.id == EntityId::from("e1")
		)));
	}
}
