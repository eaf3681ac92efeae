//! Standard component schemas, plus an opaque passthrough for everything
//! else. Component values are equality-comparable and serialize to/from a
//! self-describing tagged form so that plugin-defined components survive a
//! round trip through the server without it understanding them.

use std::collections::BTreeSet;

use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{ComponentTypeId, EntityId};

/// A row-major 4x4 transformation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4(pub [[f32; 4]; 4]);

impl Mat4 {
	pub const IDENTITY: Mat4 = Mat4([
		[1.0, 0.0, 0.0, 0.0],
		[0.0, 1.0, 0.0, 0.0],
		[0.0, 0.0, 1.0, 0.0],
		[0.0, 0.0, 0.0, 1.0],
	]);
}

impl Default for Mat4 {
	fn default() -> Self {
		Self::IDENTITY
	}
}

/// Coarse collision/physics shape used by [`Model`] and [`Collision`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
	Box { size: [f32; 3], mass: f32 },
	Sphere { radius: f32, mass: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaFormat {
	Opus,
}

/// A single, typed attribute of an entity, addressable by
/// `(ComponentTypeId, EntityId)`.
///
/// Serializes to/from the same wire shape a `#[serde(tag = "type", content =
/// "value")]` derive would produce (`{"type": "<Name>", "value": <content>}`),
/// but the `Deserialize` side is hand-written: the derive macro has no
/// catch-all for an adjacently-tagged enum, so a `"type"` naming a real
/// plugin component (anything not in the list below) would fail to parse
/// instead of falling back to `Unknown`. See `crate::interaction`'s
/// `InteractionBody::ChangeEntity`/`Announce`, which carry `Vec<Component>`
/// and would otherwise drop the whole interaction on one unrecognized
/// component.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
	Transform(Mat4),
	Relationships {
		parent: EntityId,
	},
	Model(Shape),
	Collision(Shape),
	LiveMedia {
		media_id: String,
		format: MediaFormat,
	},
	LiveMediaListener {
		media_ids: BTreeSet<String>,
	},
	/// A component type the server doesn't know about, preserved verbatim.
	Unknown {
		type_id: ComponentTypeId,
		data: serde_json::Value,
	},
}

#[derive(Serialize, Deserialize)]
struct RawComponent {
	#[serde(rename = "type")]
	type_id: String,
	value: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct RelationshipsValue {
	parent: EntityId,
}

#[derive(Serialize, Deserialize)]
struct LiveMediaValue {
	media_id: String,
	format: MediaFormat,
}

#[derive(Serialize, Deserialize)]
struct LiveMediaListenerValue {
	media_ids: BTreeSet<String>,
}

impl Serialize for Component {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let (type_id, value) = match self {
			Component::Transform(m) => ("Transform".to_owned(), serde_json::to_value(m)),
			Component::Relationships { parent } => (
				"Relationships".to_owned(),
				serde_json::to_value(RelationshipsValue { parent: parent.clone() }),
			),
			Component::Model(shape) => ("Model".to_owned(), serde_json::to_value(shape)),
			Component::Collision(shape) => ("Collision".to_owned(), serde_json::to_value(shape)),
			Component::LiveMedia { media_id, format } => (
				"LiveMedia".to_owned(),
				serde_json::to_value(LiveMediaValue { media_id: media_id.clone(), format: *format }),
			),
			Component::LiveMediaListener { media_ids } => (
				"LiveMediaListener".to_owned(),
				serde_json::to_value(LiveMediaListenerValue { media_ids: media_ids.clone() }),
			),
			// Re-tagged with its original type name, not the literal string
			// "Unknown", so re-serializing a value that round-tripped through
			// this variant produces the same wire shape it arrived in.
			Component::Unknown { type_id, data } => (type_id.0.clone(), Ok(data.clone())),
		};
		let value = value.map_err(S::Error::custom)?;
		RawComponent { type_id, value }.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Component {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = RawComponent::deserialize(deserializer)?;
		Ok(match raw.type_id.as_str() {
			"Transform" => Component::Transform(serde_json::from_value(raw.value).map_err(D::Error::custom)?),
			"Relationships" => {
				let v: RelationshipsValue = serde_json::from_value(raw.value).map_err(D::Error::custom)?;
				Component::Relationships { parent: v.parent }
			}
			"Model" => Component::Model(serde_json::from_value(raw.value).map_err(D::Error::custom)?),
			"Collision" => Component::Collision(serde_json::from_value(raw.value).map_err(D::Error::custom)?),
			"LiveMedia" => {
				let v: LiveMediaValue = serde_json::from_value(raw.value).map_err(D::Error::custom)?;
				Component::LiveMedia { media_id: v.media_id, format: v.format }
			}
			"LiveMediaListener" => {
				let v: LiveMediaListenerValue = serde_json::from_value(raw.value).map_err(D::Error::custom)?;
				Component::LiveMediaListener { media_ids: v.media_ids }
			}
			// Any other tag, including a literal "Unknown" arriving from
			// some other implementation, is an unregistered component type:
			// preserve it verbatim rather than failing the whole decode.
			other => Component::Unknown { type_id: ComponentTypeId::new(other), data: raw.value },
		})
	}
}

impl Component {
	/// The [`ComponentTypeId`] this value is stored under.
	pub fn type_id(&self) -> ComponentTypeId {
		match self {
			Component::Transform(_) => ComponentTypeId::new("Transform"),
			Component::Relationships { .. } => ComponentTypeId::new("Relationships"),
			Component::Model(_) => ComponentTypeId::new("Model"),
			Component::Collision(_) => ComponentTypeId::new("Collision"),
			Component::LiveMedia { .. } => ComponentTypeId::new("LiveMedia"),
			Component::LiveMediaListener { .. } => {
				ComponentTypeId::new("LiveMediaListener")
			}
			Component::Unknown { type_id, .. } => type_id.clone(),
		}
	}
}

/// Describes an entity to be created: its initial components and any nested
/// children, created atomically along with their parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
	pub components: Vec<Component>,
	pub children: Vec<EntityDescription>,
}
