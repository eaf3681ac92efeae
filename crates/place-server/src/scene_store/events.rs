//! Per-change observer events, fanned out over a broadcast channel so
//! multiple subscribers can react to scene ticks without back-pressure —
//! every subscriber runs on the same scheduler and processes synchronously
//! during the tick that produced the event.

use place_proto::{Component, EntityData, EntityId};

#[derive(Debug, Clone)]
pub enum SceneEvent {
	EntityAdded(EntityData),
	EntityRemoved(EntityData),
	ComponentAdded(EntityId, Component),
	ComponentUpdated(EntityId, Component),
	ComponentRemoved(EntityData, Component),
}

/// Translates a [`place_proto::PlaceChange`] into the observer events it
/// produces. A `ComponentAdded` always also produces a `ComponentUpdated`,
/// so consumers that only care about "this property changed" see it
/// uniformly regardless of whether the component is new.
pub fn events_for_change(change: &place_proto::PlaceChange) -> Vec<SceneEvent> {
	use place_proto::PlaceChange as C;
	match change {
		C::EntityAdded(d) => vec![SceneEvent::EntityAdded(d.clone())],
		C::EntityRemoved(d) => vec![SceneEvent::EntityRemoved(d.clone())],
		C::ComponentAdded(id, c) => vec![
			SceneEvent::ComponentAdded(id.clone(), c.clone()),
			SceneEvent::ComponentUpdated(id.clone(), c.clone()),
		],
		C::ComponentUpdated(id, c) => {
			vec![SceneEvent::ComponentUpdated(id.clone(), c.clone())]
		}
		C::ComponentRemoved(d, c) => {
			vec![SceneEvent::ComponentRemoved(d.clone(), c.clone())]
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use place_proto::{ClientId, Component, EntityData, EntityId, Mat4, PlaceChange};

	#[test]
	fn added_is_also_signalled_as_updated() {
		let id = EntityId::from("e1");
		let c = Component::Transform(Mat4::IDENTITY);
		let events = events_for_change(&PlaceChange::ComponentAdded(id.clone(), c.clone()));
		assert_eq!(events.len(), 2);
		assert!(matches!(&events[0], SceneEvent::ComponentAdded(i, _) if *i == id));
		assert!(matches!(&events[1], SceneEvent::ComponentUpdated(i, _) if *i == id));
	}

	#[test]
	fn removed_entity_only_signals_once() {
		let data = EntityData {
			id: EntityId::from("e1"),
			owner_client_id: ClientId::random(),
		};
		let events = events_for_change(&PlaceChange::EntityRemoved(data));
		assert_eq!(events.len(), 1);
	}
}
