//! Applying a [`PlaceChangeSet`] to a [`PlaceContents`] working copy.

use place_proto::{PlaceChange, PlaceChangeSet, PlaceContents};

use crate::errors::SceneError;

/// Applies `changes` to a clone of `base`, in the documented order
/// (entity-added, entity-removed, component changes). Fails without
/// mutating `base` if an update or remove targets a nonexistent
/// `(entity, type)` pair — the whole change set is rejected atomically.
pub fn apply(
	base: &PlaceContents,
	change_set: &PlaceChangeSet,
) -> Result<PlaceContents, SceneError> {
	let mut working = base.clone();
	working.revision = change_set.to_revision;

	for change in &change_set.changes {
		match change {
			PlaceChange::EntityAdded(data) => {
				working.entities.insert(data.id.clone(), data.clone());
			}
			PlaceChange::EntityRemoved(data) => {
				working.entities.remove(&data.id);
				for type_map in working.components.values_mut() {
					type_map.remove(&data.id);
				}
			}
			PlaceChange::ComponentAdded(entity_id, component) => {
				working
					.components
					.entry(component.type_id())
					.or_default()
					.insert(entity_id.clone(), component.clone());
			}
			PlaceChange::ComponentUpdated(entity_id, component) => {
				let type_map = working
					.components
					.get_mut(&component.type_id())
					.ok_or_else(|| {
						SceneError::NoSuchComponent(entity_id.clone(), component.type_id())
					})?;
				if !type_map.contains_key(entity_id) {
					return Err(SceneError::NoSuchComponent(
						entity_id.clone(),
						component.type_id(),
					));
				}
				type_map.insert(entity_id.clone(), component.clone());
			}
			PlaceChange::ComponentRemoved(entity_data, component) => {
				let type_id = component.type_id();
				let type_map = working
					.components
					.get_mut(&type_id)
					.ok_or_else(|| SceneError::NoSuchComponent(entity_data.id.clone(), type_id.clone()))?;
				if type_map.remove(&entity_data.id).is_none() {
					return Err(SceneError::NoSuchComponent(entity_data.id.clone(), type_id));
				}
			}
		}
	}

	Ok(working)
}
