//! Dispatches incoming interactions: ownership enforcement, place-directed
//! bodies handled locally against the scene store, everything else forwarded
//! to the owning client's session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use place_proto::{
	Component, ComponentTypeId, EntityData, EntityDescription, EntityId, Identity, Interaction,
	InteractionBody, InteractionKind, PlaceChange, PlaceContents, PlaceError, PlaceErrorCode,
	RemovalMode, RequestId, Version,
};
use tracing::{info, warn};

use crate::directory::ClientDirectory;
use crate::errors::RouterError;
use crate::heartbeat::Heartbeat;
use crate::scene_store::SceneStore;
use crate::session::Session;

pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

struct ForwardedRequest {
	origin_client: place_proto::ClientId,
}

pub struct Router {
	scene: Arc<Mutex<SceneStore>>,
	heartbeat: Heartbeat,
	directory: Arc<dyn ClientDirectory>,
	auth_provider: Mutex<Option<place_proto::ClientId>>,
	server_version: Version,
	place_name: String,
	outstanding_forwards: Arc<DashMap<RequestId, ForwardedRequest>>,
}

impl Router {
	pub fn new(
		scene: Arc<Mutex<SceneStore>>,
		heartbeat: Heartbeat,
		directory: Arc<dyn ClientDirectory>,
		server_version: Version,
		place_name: impl Into<String>,
	) -> Self {
		Self {
			scene,
			heartbeat,
			directory,
			auth_provider: Mutex::new(None),
			server_version,
			place_name: place_name.into(),
			outstanding_forwards: Arc::new(DashMap::new()),
		}
	}

	/// Clears the registered authentication provider if it was `client_id`,
	/// called on disconnect so a departed provider doesn't leave the place
	/// unable to authenticate anyone.
	pub fn clear_auth_provider_if(&self, client_id: place_proto::ClientId) {
		let mut provider = self.auth_provider.lock().expect("poisoned");
		if *provider == Some(client_id) {
			*provider = None;
		}
	}

	/// Entry point for every interaction received from `from_client`.
	/// Returns whether the connection should be torn down afterwards
	/// (spec.md §7's three per-connection-fatal cases).
	pub async fn handle(&self, from_client: place_proto::ClientId, interaction: Interaction) -> bool {
		if !matches!(interaction.body, InteractionBody::Announce { .. }) {
			if let Err(err) = self.enforce_ownership(from_client, &interaction) {
				self.fail(&interaction, from_client, err);
				return false;
			}
		}

		if interaction.receiver_entity_id.is_place() {
			self.handle_place_directed(from_client, interaction).await
		} else {
			self.forward(from_client, interaction).await;
			false
		}
	}

	fn enforce_ownership(
		&self,
		from_client: place_proto::ClientId,
		interaction: &Interaction,
	) -> Result<(), RouterError> {
		match self.directory.owner_of(&interaction.sender_entity_id) {
			Some(owner) if owner == from_client => Ok(()),
			_ => Err(RouterError::Unauthorized(interaction.sender_entity_id.clone())),
		}
	}

	fn fail(&self, interaction: &Interaction, from_client: place_proto::ClientId, err: RouterError) {
		warn!(?from_client, %err, "rejecting interaction");
		if matches!(interaction.kind, InteractionKind::Request) {
			if let Some(session) = self.directory.session(from_client) {
				session.respond(
					interaction,
					EntityId::place(),
					InteractionBody::Error(err.into_place_error()),
				);
			}
		}
	}

	async fn forward(&self, from_client: place_proto::ClientId, interaction: Interaction) {
		let Some(target_client) = self.directory.owner_of(&interaction.receiver_entity_id) else {
			self.fail(
				&interaction,
				from_client,
				RouterError::RecipientUnavailable(interaction.receiver_entity_id.clone()),
			);
			return;
		};

		match interaction.kind {
			InteractionKind::Response => {
				if let Some((_, forwarded)) = self.outstanding_forwards.remove(&interaction.request_id) {
					if let Some(session) = self.directory.session(forwarded.origin_client) {
						session.relay(&interaction);
					}
				} else {
					warn!(request_id = %interaction.request_id, "response to unknown forwarded request");
				}
			}
			InteractionKind::Request => {
				let Some(target_session) = self.directory.session(target_client) else {
					self.fail(
						&interaction,
						from_client,
						RouterError::RecipientUnavailable(interaction.receiver_entity_id.clone()),
					);
					return;
				};
				self.outstanding_forwards
					.insert(interaction.request_id, ForwardedRequest { origin_client: from_client });
				target_session.relay(&interaction);
				self.arm_forward_timeout(interaction.request_id, from_client, interaction.clone());
			}
			InteractionKind::Oneway | InteractionKind::Publication => {
				if let Some(target_session) = self.directory.session(target_client) {
					target_session.relay(&interaction);
				}
			}
		}
	}

	fn arm_forward_timeout(
		&self,
		request_id: RequestId,
		origin_client: place_proto::ClientId,
		original: Interaction,
	) {
		let outstanding = Arc::clone(&self.outstanding_forwards);
		let directory = Arc::clone(&self.directory);
		tokio::spawn(async move {
			tokio::time::sleep(FORWARD_TIMEOUT).await;
			if outstanding.remove(&request_id).is_some() {
				if let Some(session) = directory.session(origin_client) {
					session.respond(
						&original,
						EntityId::place(),
						InteractionBody::Error(RouterError::RecipientTimedOut.into_place_error()),
					);
				}
			}
		});
	}

	async fn handle_place_directed(&self, from_client: place_proto::ClientId, interaction: Interaction) -> bool {
		let result = match &interaction.body {
			InteractionBody::Announce { version, identity, avatar_description } => {
				self.handle_announce(from_client, *version, identity.clone(), avatar_description.clone())
					.await
			}
			InteractionBody::CreateEntity { desc } => self.handle_create_entity(from_client, desc.clone()).await,
			InteractionBody::RemoveEntity { entity_id, mode } => {
				self.handle_remove_entity(from_client, entity_id.clone(), *mode).await
			}
			InteractionBody::ChangeEntity { entity_id, add_or_change, remove } => {
				self.handle_change_entity(from_client, entity_id.clone(), add_or_change.clone(), remove.clone())
					.await
			}
			InteractionBody::RegisterAsAuthenticationProvider => {
				*self.auth_provider.lock().expect("poisoned") = Some(from_client);
				Ok(InteractionBody::Success)
			}
			other => Err(RouterError::InvalidRequest(format!("unexpected place-directed body: {other:?}"))),
		};

		match result {
			Ok(body) => {
				if matches!(interaction.kind, InteractionKind::Request) {
					if let Some(session) = self.directory.session(from_client) {
						session.respond(&interaction, EntityId::place(), body);
					}
				}
				false
			}
			Err(err) => {
				let fatal = err.is_connection_fatal();
				self.fail(&interaction, from_client, err);
				fatal
			}
		}
	}

	async fn handle_announce(
		&self,
		from_client: place_proto::ClientId,
		version: Version,
		identity: Identity,
		avatar_description: EntityDescription,
	) -> Result<InteractionBody, RouterError> {
		if !version.compatible_with_server(&self.server_version) {
			return Err(RouterError::IncompatibleVersion { client: version, server: self.server_version });
		}

		let registered_provider = *self.auth_provider.lock().expect("poisoned");
		if let Some(provider) = registered_provider {
			if provider != from_client {
				self.authenticate(provider, identity).await?;
			}
		}

		let avatar_id = {
			let mut scene = self.scene.lock().expect("poisoned");
			let mut changes = Vec::new();
			let avatar_id = build_entity_tree(from_client, &avatar_description, &mut changes);
			if !avatar_description.components.iter().any(|c| matches!(c, Component::Transform(_))) {
				changes.push(PlaceChange::ComponentAdded(avatar_id.clone(), Component::Transform(place_proto::Mat4::IDENTITY)));
			}
			scene.append(changes);
			scene.tick();
			avatar_id
		};
		self.heartbeat.mark_changed();
		self.directory.set_avatar(from_client, avatar_id.clone());
		info!(%from_client, %avatar_id, "client announced");

		Ok(InteractionBody::AnnounceResponse { avatar_id, place_name: self.place_name.clone() })
	}

	async fn authenticate(
		&self,
		provider: place_proto::ClientId,
		identity: Identity,
	) -> Result<(), RouterError> {
		let Some(provider_session) = self.directory.session(provider) else {
			// The registered provider disconnected; fail open is not an
			// option here, so treat as unauthorized.
			return Err(RouterError::Unauthorized(EntityId::place()));
		};
		let Some(provider_avatar) = self.directory.avatar_of(provider) else {
			return Err(RouterError::Unauthorized(EntityId::place()));
		};
		let response = provider_session
			.request(EntityId::place(), provider_avatar, InteractionBody::AuthenticationRequest { identity })
			.await?;
		match response.body {
			InteractionBody::Success => Ok(()),
			InteractionBody::Error(PlaceError { code, .. }) => {
				warn!(?code, %provider, "authentication provider rejected announcing client");
				Err(RouterError::AuthenticationRejected)
			}
			_ => Err(RouterError::InvalidRequest("authentication provider returned unexpected body".into())),
		}
	}

	async fn handle_create_entity(
		&self,
		from_client: place_proto::ClientId,
		desc: EntityDescription,
	) -> Result<InteractionBody, RouterError> {
		let entity_id = {
			let mut scene = self.scene.lock().expect("poisoned");
			let mut changes = Vec::new();
			let entity_id = build_entity_tree(from_client, &desc, &mut changes);
			scene.append(changes);
			scene.tick();
			entity_id
		};
		self.heartbeat.mark_changed();
		Ok(InteractionBody::CreateEntityResponse { entity_id })
	}

	async fn handle_remove_entity(
		&self,
		from_client: place_proto::ClientId,
		entity_id: EntityId,
		mode: RemovalMode,
	) -> Result<InteractionBody, RouterError> {
		if self.directory.owner_of(&entity_id) != Some(from_client) {
			return Err(RouterError::Unauthorized(entity_id));
		}
		{
			let mut scene = self.scene.lock().expect("poisoned");
			let changes = removal_changes(scene.current(), &entity_id, mode)?;
			scene.append(changes);
			scene.tick();
		}
		self.heartbeat.mark_changed();
		Ok(InteractionBody::Success)
	}

	async fn handle_change_entity(
		&self,
		from_client: place_proto::ClientId,
		entity_id: EntityId,
		add_or_change: Vec<Component>,
		remove: Vec<ComponentTypeId>,
	) -> Result<InteractionBody, RouterError> {
		if self.directory.owner_of(&entity_id) != Some(from_client) {
			return Err(RouterError::Unauthorized(entity_id));
		}
		{
			let mut scene = self.scene.lock().expect("poisoned");
			let mut changes = Vec::new();
			for component in add_or_change {
				let type_id = component.type_id();
				if scene.current().component(&type_id, &entity_id).is_some() {
					changes.push(PlaceChange::ComponentUpdated(entity_id.clone(), component));
				} else {
					changes.push(PlaceChange::ComponentAdded(entity_id.clone(), component));
				}
			}
			let owner_data = scene
				.current()
				.entities
				.get(&entity_id)
				.cloned()
				.ok_or_else(|| RouterError::NotFound)?;
			for type_id in remove {
				if let Some(existing) = scene.current().component(&type_id, &entity_id) {
					changes.push(PlaceChange::ComponentRemoved(owner_data.clone(), existing.clone()));
				}
			}
			scene.append(changes);
			scene.tick();
		}
		self.heartbeat.mark_changed();
		Ok(InteractionBody::Success)
	}
}

/// Builds the `EntityAdded`/`ComponentAdded` changes for a whole
/// [`EntityDescription`] tree, owned by `owner`, returning the root id.
fn build_entity_tree(
	owner: place_proto::ClientId,
	desc: &EntityDescription,
	changes: &mut Vec<PlaceChange>,
) -> EntityId {
	let id = EntityId::random();
	changes.push(PlaceChange::EntityAdded(EntityData { id: id.clone(), owner_client_id: owner }));
	for component in &desc.components {
		changes.push(PlaceChange::ComponentAdded(id.clone(), component.clone()));
	}
	for child in &desc.children {
		let child_id = build_entity_tree(owner, child, changes);
		changes.push(PlaceChange::ComponentAdded(
			child_id,
			Component::Relationships { parent: id.clone() },
		));
	}
	id
}

fn relationships_type_id() -> ComponentTypeId {
	ComponentTypeId::new("Relationships")
}

fn children_of(scene: &PlaceContents, parent: &EntityId) -> Vec<EntityId> {
	let Some(map) = scene.components.get(&relationships_type_id()) else {
		return Vec::new();
	};
	map.iter()
		.filter_map(|(child, component)| match component {
			Component::Relationships { parent: p } if p == parent => Some(child.clone()),
			_ => None,
		})
		.collect()
}

/// Builds the changes to remove `entity_id`, either cascading onto its
/// children or reparenting them onto the target's own parent (scene root if
/// it has none).
pub(crate) fn removal_changes(
	scene: &PlaceContents,
	entity_id: &EntityId,
	mode: RemovalMode,
) -> Result<Vec<PlaceChange>, RouterError> {
	let data = scene
		.entities
		.get(entity_id)
		.cloned()
		.ok_or_else(|| RouterError::NotFound)?;
	let mut changes = Vec::new();

	match mode {
		RemovalMode::Cascade => {
			let mut stack = vec![entity_id.clone()];
			while let Some(id) = stack.pop() {
				let node = scene.entities.get(&id).cloned().unwrap_or_else(|| data.clone());
				changes.push(PlaceChange::EntityRemoved(node));
				stack.extend(children_of(scene, &id));
			}
		}
		RemovalMode::Reparent => {
			let new_parent = scene.component(&relationships_type_id(), entity_id).and_then(|c| match c {
				Component::Relationships { parent } => Some(parent.clone()),
				_ => None,
			});
			for child in children_of(scene, entity_id) {
				match &new_parent {
					Some(parent) => changes.push(PlaceChange::ComponentUpdated(
						child,
						Component::Relationships { parent: parent.clone() },
					)),
					None => {
						let child_data = scene.entities.get(&child).cloned().ok_or_else(|| RouterError::NotFound)?;
						let existing = scene
							.component(&relationships_type_id(), &child)
							.cloned()
							.expect("child was found via its own Relationships component");
						changes.push(PlaceChange::ComponentRemoved(child_data, existing));
					}
				}
			}
			changes.push(PlaceChange::EntityRemoved(data));
		}
	}

	Ok(changes)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::transport::LoopbackTransport;
	use dashmap::DashMap as Map;
	use place_proto::{ClientId, EntityDescription};
	use std::time::Duration;

	struct TestDirectory {
		sessions: Map<ClientId, Arc<Session>>,
		transports: Map<ClientId, Arc<LoopbackTransport>>,
		avatars: Map<ClientId, EntityId>,
		owners: Map<EntityId, ClientId>,
	}

	impl ClientDirectory for TestDirectory {
		fn session(&self, client_id: ClientId) -> Option<Arc<Session>> {
			self.sessions.get(&client_id).map(|s| Arc::clone(&s))
		}
		fn transport(&self, client_id: ClientId) -> Option<Arc<dyn crate::transport::Transport>> {
			self.transports
				.get(&client_id)
				.map(|t| Arc::clone(&t) as Arc<dyn crate::transport::Transport>)
		}
		fn owner_of(&self, entity_id: &EntityId) -> Option<ClientId> {
			if entity_id.is_place() {
				return None;
			}
			self.owners.get(entity_id).map(|o| *o)
		}
		fn avatar_of(&self, client_id: ClientId) -> Option<EntityId> {
			self.avatars.get(&client_id).map(|a| a.clone())
		}
		fn is_announced(&self, client_id: ClientId) -> bool {
			self.avatars.contains_key(&client_id)
		}
		fn set_avatar(&self, client_id: ClientId, avatar: EntityId) {
			self.avatars.insert(client_id, avatar.clone());
			self.owners.insert(avatar, client_id);
		}
		fn all_clients(&self) -> Vec<ClientId> {
			self.sessions.iter().map(|e| *e.key()).collect()
		}
	}

	fn harness() -> (Router, Arc<TestDirectory>, Arc<Mutex<SceneStore>>) {
		let scene = Arc::new(Mutex::new(SceneStore::new()));
		let heartbeat = Heartbeat::spawn(Duration::from_millis(5), Duration::from_secs(60), || async {});
		let directory = Arc::new(TestDirectory {
			sessions: Map::new(),
			transports: Map::new(),
			avatars: Map::new(),
			owners: Map::new(),
		});
		let directory_handle: Arc<dyn ClientDirectory> = Arc::clone(&directory);
		let router = Router::new(
			Arc::clone(&scene),
			heartbeat,
			directory_handle,
			Version::new(1, 0, 0),
			"test-place",
		);
		(router, directory, scene)
	}

	async fn announce(router: &Router, directory: &TestDirectory, client: ClientId) -> EntityId {
		let (transport, _remote) = LoopbackTransport::pair(client);
		directory.transports.insert(client, Arc::clone(&transport));
		let session = Arc::new(Session::new(transport));
		directory.sessions.insert(client, session);

		let interaction = Interaction::request(
			EntityId::place(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::Announce {
				version: Version::new(1, 0, 0),
				identity: Identity::new(None, "tester", "t@example.com", ""),
				avatar_description: EntityDescription::default(),
			},
		);
		router.handle(client, interaction).await;
		directory.avatar_of(client).expect("client should have an avatar after announcing")
	}

	#[tokio::test]
	async fn announce_gives_the_avatar_an_identity_transform_by_default() {
		let (router, directory, scene) = harness();
		let client = ClientId::random();
		let avatar_id = announce(&router, &directory, client).await;
		let scene = scene.lock().expect("poisoned");
		assert_eq!(
			scene.current().component(&ComponentTypeId::new("Transform"), &avatar_id),
			Some(&Component::Transform(place_proto::Mat4::IDENTITY))
		);
	}

	#[tokio::test]
	async fn announce_creates_an_owned_avatar_entity() {
		let (router, directory, scene) = harness();
		let client = ClientId::random();
		let avatar_id = announce(&router, &directory, client).await;
		let scene = scene.lock().expect("poisoned");
		assert_eq!(scene.current().entities.get(&avatar_id).unwrap().owner_client_id, client);
	}

	#[tokio::test]
	async fn create_entity_is_owned_by_the_requester() {
		let (router, directory, scene) = harness();
		let client = ClientId::random();
		announce(&router, &directory, client).await;

		let interaction = Interaction::request(
			directory.avatar_of(client).unwrap(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::CreateEntity { desc: EntityDescription::default() },
		);
		router.handle(client, interaction).await;

		let scene = scene.lock().expect("poisoned");
		let owned: Vec<_> = scene
			.current()
			.entities
			.values()
			.filter(|e| e.owner_client_id == client)
			.collect();
		assert_eq!(owned.len(), 2); // avatar + created entity
	}

	#[tokio::test]
	async fn remove_entity_rejects_non_owner() {
		let (router, directory, scene) = harness();
		let owner = ClientId::random();
		announce(&router, &directory, owner).await;
		let intruder = ClientId::random();
		announce(&router, &directory, intruder).await;

		let interaction = Interaction::request(
			directory.avatar_of(intruder).unwrap(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::RemoveEntity {
				entity_id: directory.avatar_of(owner).unwrap(),
				mode: RemovalMode::Cascade,
			},
		);
		router.handle(intruder, interaction).await;

		let scene = scene.lock().expect("poisoned");
		assert!(scene.current().entities.contains_key(&directory.avatar_of(owner).unwrap()));
	}

	#[tokio::test]
	async fn forward_to_unknown_receiver_responds_recipient_unavailable() {
		let (router, directory, _scene) = harness();
		let client = ClientId::random();
		announce(&router, &directory, client).await;

		let interaction = Interaction::request(
			directory.avatar_of(client).unwrap(),
			EntityId::from("nonexistent"),
			RequestId::random(),
			InteractionBody::Success,
		);
		router.handle(client, interaction).await;

		let transport = directory.transports.get(&client).unwrap();
		let sent = transport.sent_on(place_proto::ChannelLabel::Interactions);
		assert_eq!(sent.len(), 1);
		let response: Interaction = place_proto::wire::decode(&sent[0]).unwrap();
		assert!(matches!(
			response.body,
			InteractionBody::Error(PlaceError { code: PlaceErrorCode::RecipientUnavailable, .. })
		));
	}

	#[tokio::test]
	async fn announce_with_incompatible_version_is_connection_fatal() {
		let (router, directory, _scene) = harness();
		let client = ClientId::random();
		let (transport, _remote) = LoopbackTransport::pair(client);
		directory.transports.insert(client, Arc::clone(&transport));
		let session = Arc::new(Session::new(transport));
		directory.sessions.insert(client, session);

		let interaction = Interaction::request(
			EntityId::place(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::Announce {
				version: Version::new(2, 0, 0), // server is 1.0.0: major mismatch
				identity: Identity::new(None, "tester", "t@example.com", ""),
				avatar_description: EntityDescription::default(),
			},
		);
		let fatal = router.handle(client, interaction).await;
		assert!(fatal, "incompatible protocol version must be connection-fatal");
	}

	#[tokio::test]
	async fn ownership_rejection_on_remove_is_not_connection_fatal() {
		let (router, directory, _scene) = harness();
		let owner = ClientId::random();
		announce(&router, &directory, owner).await;
		let intruder = ClientId::random();
		announce(&router, &directory, intruder).await;

		let interaction = Interaction::request(
			directory.avatar_of(intruder).unwrap(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::RemoveEntity {
				entity_id: directory.avatar_of(owner).unwrap(),
				mode: RemovalMode::Cascade,
			},
		);
		let fatal = router.handle(intruder, interaction).await;
		assert!(!fatal, "a plain ownership rejection must not disconnect the client");
	}
}
