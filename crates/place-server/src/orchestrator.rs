//! Binds the Heartbeat, Scene Store, Interaction Router and SFU Reconciler
//! together, owns the connected-client registry, and is the entry point for
//! new connections arriving over HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use place_proto::{ClientId, EntityId, Identity, Interaction, InteractionBody, RemovalMode, SignallingPayload, StateRevision, Version};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::directory::ClientDirectory;
use crate::heartbeat::{Heartbeat, DEFAULT_COALESCE_DELAY, DEFAULT_KEEPALIVE_DELAY};
use crate::router::Router;
use crate::scene_store::SceneStore;
use crate::session::{Session, SessionEvent};
use crate::sfu::SfuReconciler;
use crate::transport::{MediaEvent, MediaForwarding, Transport, TransportFactory};

struct ClientRecord {
	session: Arc<Session>,
	transport: Arc<dyn Transport>,
	avatar: Mutex<Option<EntityId>>,
	acked_revision: Mutex<Option<StateRevision>>,
}

/// The `ClientDirectory` the Router and SFU Reconciler consult. Holds no
/// mutation logic of its own beyond bookkeeping the registry; scene mutation
/// stays the Router's job.
pub struct ClientRegistry {
	scene: Arc<Mutex<SceneStore>>,
	clients: DashMap<ClientId, ClientRecord>,
}

impl ClientRegistry {
	fn new(scene: Arc<Mutex<SceneStore>>) -> Self {
		Self { scene, clients: DashMap::new() }
	}
}

impl ClientDirectory for ClientRegistry {
	fn session(&self, client_id: ClientId) -> Option<Arc<Session>> {
		self.clients.get(&client_id).map(|r| Arc::clone(&r.session))
	}

	fn transport(&self, client_id: ClientId) -> Option<Arc<dyn Transport>> {
		self.clients.get(&client_id).map(|r| Arc::clone(&r.transport))
	}

	fn owner_of(&self, entity_id: &EntityId) -> Option<ClientId> {
		if entity_id.is_place() {
			return None;
		}
		self.scene.lock().expect("poisoned").current().entities.get(entity_id).map(|e| e.owner_client_id)
	}

	fn avatar_of(&self, client_id: ClientId) -> Option<EntityId> {
		self.clients.get(&client_id).and_then(|r| r.avatar.lock().expect("poisoned").clone())
	}

	fn is_announced(&self, client_id: ClientId) -> bool {
		self.clients
			.get(&client_id)
			.map(|r| r.avatar.lock().expect("poisoned").is_some())
			.unwrap_or(false)
	}

	fn set_avatar(&self, client_id: ClientId, avatar: EntityId) {
		if let Some(record) = self.clients.get(&client_id) {
			*record.avatar.lock().expect("poisoned") = Some(avatar);
		}
	}

	fn all_clients(&self) -> Vec<ClientId> {
		self.clients.iter().map(|e| *e.key()).collect()
	}
}

/// Tunable timing/config the Orchestrator is built with. Mirrors the CLI
/// surface in spec.md §6 minus the networking-specific fields that belong to
/// the (out-of-scope) concrete Transport implementation.
pub struct OrchestratorConfig {
	pub place_name: String,
	pub server_version: Version,
	pub coalesce_delay: Duration,
	pub keepalive_delay: Duration,
}

impl Default for OrchestratorConfig {
	fn default() -> Self {
		Self {
			place_name: "Place".to_owned(),
			server_version: Version::new(1, 0, 0),
			coalesce_delay: DEFAULT_COALESCE_DELAY,
			keepalive_delay: DEFAULT_KEEPALIVE_DELAY,
		}
	}
}

pub struct Orchestrator {
	scene: Arc<Mutex<SceneStore>>,
	registry: Arc<ClientRegistry>,
	router: Arc<Router>,
	sfu: Arc<SfuReconciler>,
	heartbeat: Heartbeat,
	transport_factory: Arc<dyn TransportFactory>,
}

impl Orchestrator {
	pub fn new(
		config: OrchestratorConfig,
		transport_factory: Arc<dyn TransportFactory>,
		forwarding: Arc<dyn MediaForwarding>,
	) -> Arc<Self> {
		let scene = Arc::new(Mutex::new(SceneStore::new()));
		let registry = Arc::new(ClientRegistry::new(Arc::clone(&scene)));
		let directory: Arc<dyn ClientDirectory> = Arc::clone(&registry) as Arc<dyn ClientDirectory>;
		let sfu = Arc::new(SfuReconciler::new(Arc::clone(&directory), forwarding));

		let heartbeat = {
			let scene = Arc::clone(&scene);
			let registry = Arc::clone(&registry);
			let sfu = Arc::clone(&sfu);
			Heartbeat::spawn(config.coalesce_delay, config.keepalive_delay, move || {
				let scene = Arc::clone(&scene);
				let registry = Arc::clone(&registry);
				let sfu = Arc::clone(&sfu);
				async move { Self::on_heartbeat(&scene, &registry, &sfu).await }
			})
		};

		let router = Arc::new(Router::new(
			Arc::clone(&scene),
			heartbeat.clone(),
			directory,
			config.server_version,
			config.place_name,
		));

		Arc::new(Self { scene, registry, router, sfu, heartbeat, transport_factory })
	}

	/// Every heartbeat fire: tick the Scene Store once, broadcast each
	/// announced client's pending delta, and reconcile the SFU against the
	/// resulting state.
	async fn on_heartbeat(scene: &Arc<Mutex<SceneStore>>, registry: &Arc<ClientRegistry>, sfu: &Arc<SfuReconciler>) {
		scene.lock().expect("poisoned").tick();

		let client_ids: Vec<ClientId> = registry.clients.iter().map(|e| *e.key()).collect();
		debug!(clients = client_ids.len(), "heartbeat tick");
		for client_id in client_ids {
			let Some(record) = registry.clients.get(&client_id) else { continue };
			if record.avatar.lock().expect("poisoned").is_none() {
				continue; // unannounced clients don't receive world state
			}
			let acked = *record.acked_revision.lock().expect("poisoned");
			let change_set = scene.lock().expect("poisoned").diff_since_ack(acked);
			if let Err(source) = record.session.broadcast_worldstate(&change_set) {
				warn!(%client_id, %source, "failed to broadcast world state");
			}
		}

		let snapshot = scene.lock().expect("poisoned").current().clone();
		sfu.reconcile(&snapshot).await;
	}

	/// Handles an incoming HTTP offer: builds the Transport+Session, joins
	/// the client to the unannounced set, and spawns its event pump.
	pub async fn connect(self: &Arc<Self>, offer: SignallingPayload) -> eyre::Result<SignallingPayload> {
		let client_id = ClientId::random();
		let (transport, mut answer) = self.transport_factory.create(client_id, offer).await?;
		let session = Arc::new(Session::new(Arc::clone(&transport)));
		self.registry.clients.insert(
			client_id,
			ClientRecord {
				session: Arc::clone(&session),
				transport,
				avatar: Mutex::new(None),
				acked_revision: Mutex::new(None),
			},
		);
		answer.client_id = Some(client_id);

		let this = Arc::clone(self);
		tokio::spawn(
			async move { this.pump_session(client_id, session).await }
				.instrument(info_span!("session", %client_id)),
		);

		info!(%client_id, "client connected");
		Ok(answer)
	}

	async fn pump_session(self: Arc<Self>, client_id: ClientId, session: Arc<Session>) {
		while let Some(event) = session.recv().await {
			match event {
				SessionEvent::Interaction(interaction) => {
					if self.router.handle(client_id, interaction).await {
						// spec.md §7: incompatible version / rejected
						// authentication are fatal per-connection, after the
						// error response has already been delivered above.
						self.disconnect(client_id).await;
						return;
					}
				}
				SessionEvent::Intent(intent) => {
					if let Some(record) = self.registry.clients.get(&client_id) {
						*record.acked_revision.lock().expect("poisoned") = Some(intent.ack_state_rev);
					}
				}
				SessionEvent::Log(message) => {
					info!(%client_id, %message, "client log");
				}
				SessionEvent::Media(MediaEvent::Available(stream)) => {
					self.sfu.mark_available(client_id, stream.local_media_id, stream.direction);
				}
				SessionEvent::Media(MediaEvent::Lost(local_media_id)) => {
					self.sfu.mark_unavailable(client_id, &local_media_id);
				}
			}
		}
		self.disconnect(client_id).await;
	}

	/// Removes entities owned by `client_id` (reparenting their children),
	/// waits one heartbeat tick so the removal is observed by the remaining
	/// clients, then drops the client record.
	pub async fn disconnect(&self, client_id: ClientId) {
		let owned: Vec<EntityId> = {
			let scene = self.scene.lock().expect("poisoned");
			scene
				.current()
				.entities
				.values()
				.filter(|e| e.owner_client_id == client_id)
				.map(|e| e.id.clone())
				.collect()
		};

		if !owned.is_empty() {
			let mut scene = self.scene.lock().expect("poisoned");
			for entity_id in &owned {
				match crate::router::removal_changes(scene.current(), entity_id, RemovalMode::Reparent) {
					Ok(changes) => scene.append(changes),
					Err(source) => warn!(%client_id, %entity_id, %source, "failed to compute disconnect cascade"),
				}
			}
			scene.tick();
			drop(scene);
			self.heartbeat.mark_changed();
			self.heartbeat.await_next_sync().await;
		}

		self.router.clear_auth_provider_if(client_id);

		if let Some((_, record)) = self.registry.clients.remove(&client_id) {
			record.session.disconnect().await;
		}
		info!(%client_id, removed_entities = owned.len(), "client disconnected");
	}

	pub fn router(&self) -> &Arc<Router> {
		&self.router
	}

	pub fn directory(&self) -> Arc<dyn ClientDirectory> {
		Arc::clone(&self.registry) as Arc<dyn ClientDirectory>
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::transport::{LoopbackTransportFactory, RecordingForwarding, TransportEvent};
	use place_proto::{ChannelLabel, EntityDescription, RequestId};
	use std::time::Duration as StdDuration;

	fn test_config() -> OrchestratorConfig {
		OrchestratorConfig {
			place_name: "T".to_owned(),
			server_version: Version::new(1, 0, 0),
			coalesce_delay: StdDuration::from_millis(5),
			keepalive_delay: StdDuration::from_secs(60),
		}
	}

	async fn announce_over_http(
		orchestrator: &Arc<Orchestrator>,
		factory: &Arc<LoopbackTransportFactory>,
	) -> (ClientId, crate::transport::LoopbackRemote) {
		let answer = orchestrator
			.connect(SignallingPayload::new("v=0 client-offer", vec![]))
			.await
			.unwrap();
		let client_id = answer.client_id.expect("orchestrator assigns a client id");
		let mut remote = factory.take_remote(client_id).expect("factory stashed a remote");

		let announce = Interaction::request(
			EntityId::place(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::Announce {
				version: Version::new(1, 0, 0),
				identity: Identity::new(None, "tester", "t@example.com", ""),
				avatar_description: EntityDescription::default(),
			},
		);
		remote
			.to_server
			.send(TransportEvent::Data {
				channel: ChannelLabel::Interactions,
				payload: place_proto::wire::encode(&announce).unwrap().into(),
			})
			.unwrap();

		// Drain the announceResponse so the test can assert on it if needed.
		loop {
			match remote.from_server.recv().await.unwrap() {
				TransportEvent::Data { channel: ChannelLabel::Interactions, payload } => {
					let response: Interaction = place_proto::wire::decode(&payload).unwrap();
					if matches!(response.body, InteractionBody::AnnounceResponse { .. }) {
						break;
					}
				}
				_ => continue,
			}
		}
		(client_id, remote)
	}

	#[tokio::test]
	async fn connect_then_announce_promotes_client_to_announced() {
		let factory = Arc::new(LoopbackTransportFactory::default());
		let orchestrator = Orchestrator::new(
			test_config(),
			Arc::clone(&factory) as Arc<dyn TransportFactory>,
			Arc::new(RecordingForwarding::default()) as Arc<dyn MediaForwarding>,
		);
		let (client_id, _remote) = announce_over_http(&orchestrator, &factory).await;
		assert!(orchestrator.registry.is_announced(client_id));
	}

	#[tokio::test(start_paused = true)]
	async fn heartbeat_broadcasts_full_diff_to_a_never_acked_client() {
		let factory = Arc::new(LoopbackTransportFactory::default());
		let orchestrator = Orchestrator::new(
			test_config(),
			Arc::clone(&factory) as Arc<dyn TransportFactory>,
			Arc::new(RecordingForwarding::default()) as Arc<dyn MediaForwarding>,
		);
		let (_client_id, mut remote) = announce_over_http(&orchestrator, &factory).await;

		loop {
			match remote.from_server.recv().await.unwrap() {
				TransportEvent::Data { channel: ChannelLabel::Worldstate, payload } => {
					let change_set: place_proto::PlaceChangeSet = place_proto::wire::decode(&payload).unwrap();
					assert_eq!(change_set.from_revision, 0);
					assert!(!change_set.changes.is_empty());
					break;
				}
				_ => continue,
			}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn disconnect_removes_owned_entities_and_clears_registry() {
		let factory = Arc::new(LoopbackTransportFactory::default());
		let orchestrator = Orchestrator::new(
			test_config(),
			Arc::clone(&factory) as Arc<dyn TransportFactory>,
			Arc::new(RecordingForwarding::default()) as Arc<dyn MediaForwarding>,
		);
		let (client_id, _remote) = announce_over_http(&orchestrator, &factory).await;
		let avatar_id = orchestrator.registry.avatar_of(client_id).unwrap();

		orchestrator.disconnect(client_id).await;

		assert!(!orchestrator.registry.clients.contains_key(&client_id));
		assert!(!orchestrator.scene.lock().unwrap().current().entities.contains_key(&avatar_id));
	}

	#[tokio::test]
	async fn incompatible_version_announce_disconnects_the_client() {
		let factory = Arc::new(LoopbackTransportFactory::default());
		let orchestrator = Orchestrator::new(
			test_config(),
			Arc::clone(&factory) as Arc<dyn TransportFactory>,
			Arc::new(RecordingForwarding::default()) as Arc<dyn MediaForwarding>,
		);
		let answer = orchestrator
			.connect(SignallingPayload::new("v=0 client-offer", vec![]))
			.await
			.unwrap();
		let client_id = answer.client_id.unwrap();
		let mut remote = factory.take_remote(client_id).unwrap();

		let announce = Interaction::request(
			EntityId::place(),
			EntityId::place(),
			RequestId::random(),
			InteractionBody::Announce {
				version: Version::new(9, 0, 0), // server is 1.0.0: major mismatch
				identity: Identity::new(None, "tester", "t@example.com", ""),
				avatar_description: EntityDescription::default(),
			},
		);
		remote
			.to_server
			.send(TransportEvent::Data {
				channel: ChannelLabel::Interactions,
				payload: place_proto::wire::encode(&announce).unwrap().into(),
			})
			.unwrap();

		let error_response = loop {
			match remote.from_server.recv().await.unwrap() {
				TransportEvent::Data { channel: ChannelLabel::Interactions, payload } => {
					let response: Interaction = place_proto::wire::decode(&payload).unwrap();
					if let InteractionBody::Error(err) = response.body {
						break err;
					}
				}
				_ => continue,
			}
		};
		assert_eq!(error_response.code, place_proto::PlaceErrorCode::IncompatibleProtocolVersion);

		// pump_session disconnects the client right after delivering the
		// error response; poll the registry until it observes that.
		for _ in 0..200 {
			if !orchestrator.registry.clients.contains_key(&client_id) {
				return;
			}
			tokio::time::sleep(StdDuration::from_millis(5)).await;
		}
		panic!("client was never removed from the registry after a fatal announce error");
	}
}
