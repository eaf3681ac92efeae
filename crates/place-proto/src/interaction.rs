//! Typed, addressable messages exchanged on the `interactions` data channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::EntityDescription;
use crate::error::PlaceError;
use crate::ids::{ComponentTypeId, EntityId, RequestId};
use crate::wire::SignallingPayload;

/// Server/client build compatibility, compared with the semver rule: a
/// client is compatible when its major version equals the server's and its
/// minor version is `<=` the server's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
	pub major: u32,
	pub minor: u32,
	pub patch: u32,
}

impl Version {
	pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
		Self { major, minor, patch }
	}

	/// True if a client announcing with `self` as its version is compatible
	/// with a server running `server`.
	pub fn compatible_with_server(&self, server: &Version) -> bool {
		self.major == server.major && self.minor <= server.minor
	}
}

impl std::fmt::Display for Version {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

/// The claimed identity of an announcing client. Carries no cryptographic
/// proof itself; the registered authentication provider, if any, is the one
/// that vouches for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub provider_id: Option<Uuid>,
	pub display_name: String,
	pub email: String,
	pub extra: String,
}

impl Identity {
	pub fn new(
		provider_id: Option<Uuid>,
		display_name: impl Into<String>,
		email: impl Into<String>,
		extra: impl Into<String>,
	) -> Self {
		Self {
			provider_id,
			display_name: display_name.into(),
			email: email.into(),
			extra: extra.into(),
		}
	}
}

/// How a `removeEntity` should treat the target's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalMode {
	/// Children are reparented to the scene root.
	Reparent,
	/// Children are removed along with their parent.
	Cascade,
}

/// Which side of a renegotiation a `Renegotiate` body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenegotiationDirection {
	Offer,
	Answer,
}

/// The payload of an Interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "body")]
pub enum InteractionBody {
	Announce {
		version: Version,
		identity: Identity,
		avatar_description: EntityDescription,
	},
	AnnounceResponse {
		avatar_id: EntityId,
		place_name: String,
	},
	CreateEntity {
		desc: EntityDescription,
	},
	CreateEntityResponse {
		entity_id: EntityId,
	},
	RemoveEntity {
		entity_id: EntityId,
		mode: RemovalMode,
	},
	ChangeEntity {
		entity_id: EntityId,
		add_or_change: Vec<crate::component::Component>,
		remove: Vec<ComponentTypeId>,
	},
	RegisterAsAuthenticationProvider,
	AuthenticationRequest {
		identity: Identity,
	},
	Renegotiate {
		direction: RenegotiationDirection,
		sdp: SignallingPayload,
	},
	Success,
	Error(PlaceError),
	/// Plugin-defined payloads, preserved verbatim.
	Custom(serde_json::Value),
}

/// How an Interaction should be routed and correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionKind {
	/// No response is expected.
	Oneway,
	/// A response with the same `request_id` is expected.
	Request,
	/// Completes an outstanding request.
	Response,
	/// Broadcast-style notification; no response is expected or tracked.
	Publication,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
	pub kind: InteractionKind,
	pub sender_entity_id: EntityId,
	pub receiver_entity_id: EntityId,
	pub request_id: RequestId,
	pub body: InteractionBody,
}

impl Interaction {
	pub fn oneway(
		sender: EntityId,
		receiver: EntityId,
		body: InteractionBody,
	) -> Self {
		Self {
			kind: InteractionKind::Oneway,
			sender_entity_id: sender,
			receiver_entity_id: receiver,
			request_id: RequestId::random(),
			body,
		}
	}

	pub fn request(
		sender: EntityId,
		receiver: EntityId,
		request_id: RequestId,
		body: InteractionBody,
	) -> Self {
		Self {
			kind: InteractionKind::Request,
			sender_entity_id: sender,
			receiver_entity_id: receiver,
			request_id,
			body,
		}
	}

	/// Builds the response to this interaction, swapping sender/receiver and
	/// carrying the same `request_id` so the original requester can correlate
	/// it.
	pub fn respond(&self, from: EntityId, body: InteractionBody) -> Self {
		Self {
			kind: InteractionKind::Response,
			sender_entity_id: from,
			receiver_entity_id: self.sender_entity_id.clone(),
			request_id: self.request_id,
			body,
		}
	}
}
