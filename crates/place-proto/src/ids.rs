//! Identifiers shared between the place server and its clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved [`EntityId`] denoting the Place itself as an Interaction recipient.
pub const PLACE_ENTITY_ID: &str = "place";

macro_rules! make_uuid {
    {$(
        $(#[$meta:meta])*
        $vis:vis struct $ident:ident;
    )*} => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
        $vis struct $ident(Uuid);

        impl $ident {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    )*}
}

make_uuid! {
	/// Opaque 128-bit identifier for a connected client. Server-assigned on
	/// transport creation.
	pub struct ClientId;

	/// Correlates a `request` Interaction with its eventual `response`. Unique
	/// within the lifetime of the session/router that allocated it.
	pub struct RequestId;
}

impl ClientId {
	/// The short form used inside SDP attributes that have length limits, e.g.
	/// as part of a [`crate::scene::Component`] `LiveMedia` media id. This is
	/// the first hyphen-delimited token of the UUID's stringification.
	pub fn short_form(&self) -> String {
		self.0
			.to_string()
			.split('-')
			.next()
			.expect("uuid stringification always has at least one token")
			.to_owned()
	}
}

/// Opaque string identifying an entity. Unique within a place and never
/// reused within a run, except for the reserved sentinel [`PLACE_ENTITY_ID`]
/// which denotes the place itself rather than a scene entity.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
	pub fn place() -> Self {
		Self(PLACE_ENTITY_ID.to_owned())
	}

	pub fn is_place(&self) -> bool {
		self.0 == PLACE_ENTITY_ID
	}

	pub fn random() -> Self {
		Self(Uuid::new_v4().to_string())
	}
}

impl std::fmt::Display for EntityId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for EntityId {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl From<&str> for EntityId {
	fn from(s: &str) -> Self {
		Self(s.to_owned())
	}
}

/// Names a registered component schema.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ComponentTypeId(pub String);

impl ComponentTypeId {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}
}

impl std::fmt::Display for ComponentTypeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl From<&str> for ComponentTypeId {
	fn from(s: &str) -> Self {
		Self(s.to_owned())
	}
}

/// Monotonic revision counter of a [`crate::scene::PlaceContents`] snapshot.
/// `0` is reserved for the empty place.
pub type StateRevision = u64;

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn short_form_is_first_uuid_token() {
		let cid = ClientId::random();
		let full = cid.uuid().to_string();
		let expected = full.split('-').next().unwrap().to_owned();
		assert_eq!(cid.short_form(), expected);
		assert!(cid.short_form().len() < full.len());
	}

	#[test]
	fn place_entity_id_round_trips() {
		let place = EntityId::place();
		assert!(place.is_place());
		assert_eq!(place.0, PLACE_ENTITY_ID);
		assert!(!EntityId::from("avatar-1").is_place());
	}
}
