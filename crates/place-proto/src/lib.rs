//! Wire types shared between the place server and its clients: the scene
//! graph's data model, the Interaction protocol, and HTTP signalling
//! payloads. Kept free of any transport or scheduling concerns so it can be
//! depended on by both sides of a connection.

pub mod component;
pub mod error;
pub mod ids;
pub mod interaction;
pub mod scene;
pub mod wire;

pub use component::{Component, EntityDescription, Mat4, MediaFormat, Shape};
pub use error::{PlaceError, PlaceErrorCode};
pub use ids::{ClientId, ComponentTypeId, EntityId, RequestId, StateRevision};
pub use interaction::{
	Identity, Interaction, InteractionBody, InteractionKind, RemovalMode,
	RenegotiationDirection, Version,
};
pub use scene::{EntityData, Intent, PlaceChange, PlaceChangeSet, PlaceContents};
pub use wire::{ChannelLabel, IceCandidate, SignallingPayload};
