//! The registry interface the Router and SFU Reconciler need from connected
//! clients. Owned and implemented by the Orchestrator; kept as a trait here
//! so neither collaborator depends on the other's concrete state.

use std::sync::Arc;

use place_proto::{ClientId, EntityId};

use crate::session::Session;
use crate::transport::Transport;

pub trait ClientDirectory: Send + Sync {
	fn session(&self, client_id: ClientId) -> Option<Arc<Session>>;
	fn transport(&self, client_id: ClientId) -> Option<Arc<dyn Transport>>;
	fn owner_of(&self, entity_id: &EntityId) -> Option<ClientId>;
	fn avatar_of(&self, client_id: ClientId) -> Option<EntityId>;
	fn is_announced(&self, client_id: ClientId) -> bool;
	fn set_avatar(&self, client_id: ClientId, avatar: EntityId);
	/// All currently connected client ids, for fan-out over the whole place.
	fn all_clients(&self) -> Vec<ClientId>;
}
