//! Per-connection session: request/response correlation on the
//! `interactions` channel, `worldstate`/`logs` channel routing, and the
//! renegotiation state machine.
//!
//! The server always plays the *impolite* side of WebRTC's perfect
//! negotiation pattern: when an incoming offer collides with one the server
//! already sent, the incoming offer is discarded and the server's own offer
//! wins. Clients are expected to play *polite* and roll back.

use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use place_proto::{
	ChannelLabel, EntityId, Interaction, InteractionBody, Intent, PlaceChangeSet, PlaceError,
	PlaceErrorCode, RenegotiationDirection, RequestId, SignallingPayload,
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::errors::{RouterError, SessionError};
use crate::transport::{MediaEvent, Transport, TransportEvent};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenegotiationState {
	Stable,
	HaveLocalOffer,
	HaveRemoteOffer,
}

/// A decoded, application-level event for the Router/Orchestrator to act on.
/// Renegotiation and request/response bookkeeping never surface here: the
/// session handles them internally.
pub enum SessionEvent {
	Interaction(Interaction),
	Intent(Intent),
	Log(String),
	Media(MediaEvent),
}

pub struct Session {
	transport: std::sync::Arc<dyn Transport>,
	renegotiation: Mutex<RenegotiationState>,
	/// Set when a renegotiation was requested while not stable; consumed the
	/// next time the transport reports `stable`.
	renegotiation_pending: Mutex<bool>,
	outstanding: DashMap<RequestId, oneshot::Sender<Interaction>>,
}

impl Session {
	pub fn new(transport: std::sync::Arc<dyn Transport>) -> Self {
		Self {
			transport,
			renegotiation: Mutex::new(RenegotiationState::Stable),
			renegotiation_pending: Mutex::new(false),
			outstanding: DashMap::new(),
		}
	}

	/// Pulls the next application event off the transport. Renegotiation
	/// messages and request/response correlation are consumed internally and
	/// never surfaced; `None` once the transport is exhausted.
	pub async fn recv(&self) -> Option<SessionEvent> {
		loop {
			match self.transport.recv().await? {
				TransportEvent::Data { channel, payload } => {
					if let Some(event) = self.handle_data(channel, &payload).await {
						return Some(event);
					}
				}
				TransportEvent::Media(event) => return Some(SessionEvent::Media(event)),
				TransportEvent::SignallingStable => {
					self.on_stable().await;
				}
			}
		}
	}

	async fn handle_data(&self, channel: ChannelLabel, payload: &[u8]) -> Option<SessionEvent> {
		match channel {
			ChannelLabel::Interactions => {
				let interaction: Interaction = match place_proto::wire::decode(payload) {
					Ok(i) => i,
					Err(source) => {
						warn!(?source, "dropping malformed interaction");
						return None;
					}
				};
				self.handle_interaction(interaction).await
			}
			ChannelLabel::Worldstate => {
				let intent: Intent = match place_proto::wire::decode(payload) {
					Ok(i) => i,
					Err(source) => {
						warn!(?source, "dropping malformed intent");
						return None;
					}
				};
				Some(SessionEvent::Intent(intent))
			}
			ChannelLabel::Logs => {
				Some(SessionEvent::Log(String::from_utf8_lossy(payload).into_owned()))
			}
		}
	}

	async fn handle_interaction(&self, interaction: Interaction) -> Option<SessionEvent> {
		if let InteractionBody::Renegotiate { direction, sdp } = interaction.body.clone() {
			self.handle_renegotiate(direction, sdp, &interaction).await;
			return None;
		}
		if matches!(interaction.kind, place_proto::InteractionKind::Response) {
			if let Some((_, tx)) = self.outstanding.remove(&interaction.request_id) {
				let _ = tx.send(interaction);
			} else {
				trace!(request_id = %interaction.request_id, "response with no outstanding request");
			}
			return None;
		}
		Some(SessionEvent::Interaction(interaction))
	}

	async fn handle_renegotiate(
		&self,
		direction: RenegotiationDirection,
		sdp: SignallingPayload,
		original: &Interaction,
	) {
		match direction {
			RenegotiationDirection::Offer => {
				let mut state = self.renegotiation.lock().expect("poisoned");
				if *state == RenegotiationState::HaveLocalOffer {
					debug!("glare: discarding incoming offer, server's own offer wins");
					drop(state);
					self.send_raw(&Interaction::oneway(
						EntityId::place(),
						original.sender_entity_id.clone(),
						InteractionBody::Error(PlaceError::place(
							PlaceErrorCode::DiscardedRenegotiation,
							"server has an outstanding renegotiation offer of its own".into(),
						)),
					));
					return;
				}
				*state = RenegotiationState::HaveRemoteOffer;
				drop(state);

				let answer = match self.transport.generate_answer(sdp).await {
					Ok(answer) => answer,
					Err(source) => {
						warn!(?source, "failed to answer renegotiation offer");
						return;
					}
				};
				let response = Interaction::oneway(
					EntityId::place(),
					original.sender_entity_id.clone(),
					InteractionBody::Renegotiate {
						direction: RenegotiationDirection::Answer,
						sdp: answer,
					},
				);
				self.send_raw(&response);
				*self.renegotiation.lock().expect("poisoned") = RenegotiationState::Stable;
			}
			RenegotiationDirection::Answer => {
				if let Err(source) = self.transport.accept_answer(sdp).await {
					warn!(?source, "failed to accept renegotiation answer, disconnecting");
					self.send_raw(&Interaction::oneway(
						EntityId::place(),
						original.sender_entity_id.clone(),
						InteractionBody::Error(PlaceError::place(
							PlaceErrorCode::FailedRenegotiation,
							source.to_string(),
						)),
					));
					self.transport.disconnect().await;
					return;
				}
				*self.renegotiation.lock().expect("poisoned") = RenegotiationState::Stable;
			}
		}
	}

	async fn on_stable(&self) {
		*self.renegotiation.lock().expect("poisoned") = RenegotiationState::Stable;
		let mut pending = self.renegotiation_pending.lock().expect("poisoned");
		if *pending {
			*pending = false;
			drop(pending);
			self.start_renegotiation().await;
		}
	}

	/// Requests a renegotiation (e.g. a new media stream needs a channel).
	/// If the session isn't stable right now, the request is deferred until
	/// it is.
	pub async fn request_renegotiation(&self) {
		let stable = *self.renegotiation.lock().expect("poisoned") == RenegotiationState::Stable;
		if stable {
			self.start_renegotiation().await;
		} else {
			*self.renegotiation_pending.lock().expect("poisoned") = true;
		}
	}

	async fn start_renegotiation(&self) {
		let offer = match self.transport.generate_offer().await {
			Ok(offer) => offer,
			Err(source) => {
				warn!(?source, "failed to generate renegotiation offer");
				return;
			}
		};
		*self.renegotiation.lock().expect("poisoned") = RenegotiationState::HaveLocalOffer;
		let interaction = Interaction::oneway(
			EntityId::place(),
			EntityId::place(),
			InteractionBody::Renegotiate {
				direction: RenegotiationDirection::Offer,
				sdp: offer,
			},
		);
		self.send_raw(&interaction);
	}

	fn send_raw(&self, interaction: &Interaction) {
		match place_proto::wire::encode(interaction) {
			Ok(bytes) => {
				if let Err(source) = self.transport.send(ChannelLabel::Interactions, bytes.into()) {
					warn!(?source, "failed to send on interactions channel");
				}
			}
			Err(source) => warn!(?source, "failed to encode interaction"),
		}
	}

	pub fn send_oneway(&self, sender: EntityId, receiver: EntityId, body: InteractionBody) {
		self.send_raw(&Interaction::oneway(sender, receiver, body));
	}

	/// Relays an interaction verbatim, e.g. one forwarded from another
	/// client by the router. Preserves `kind`/`request_id` as-is.
	pub fn relay(&self, interaction: &Interaction) {
		self.send_raw(interaction);
	}

	pub fn respond(&self, original: &Interaction, from: EntityId, body: InteractionBody) {
		self.send_raw(&original.respond(from, body));
	}

	/// Sends a request and awaits its response, failing with
	/// [`RouterError::RecipientTimedOut`] if none arrives within
	/// [`DEFAULT_REQUEST_TIMEOUT`].
	pub async fn request(
		&self,
		sender: EntityId,
		receiver: EntityId,
		body: InteractionBody,
	) -> Result<Interaction, RouterError> {
		self.request_with_timeout(sender, receiver, body, DEFAULT_REQUEST_TIMEOUT).await
	}

	pub async fn request_with_timeout(
		&self,
		sender: EntityId,
		receiver: EntityId,
		body: InteractionBody,
		timeout: Duration,
	) -> Result<Interaction, RouterError> {
		let request_id = RequestId::random();
		let (tx, rx) = oneshot::channel();
		self.outstanding.insert(request_id, tx);
		self.send_raw(&Interaction::request(sender, receiver, request_id, body));

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(response)) => Ok(response),
			Ok(Err(_)) | Err(_) => {
				self.outstanding.remove(&request_id);
				Err(RouterError::RecipientTimedOut)
			}
		}
	}

	/// Broadcasts a scene delta on the unreliable `worldstate` channel.
	pub fn broadcast_worldstate(&self, change_set: &PlaceChangeSet) -> Result<(), SessionError> {
		let bytes = place_proto::wire::encode(change_set)
			.map_err(|source| SessionError::Decode { channel: ChannelLabel::Worldstate, source })?;
		self.transport
			.send(ChannelLabel::Worldstate, bytes.into())
			.map_err(SessionError::Transport)?;
		Ok(())
	}

	pub async fn disconnect(&self) {
		self.transport.disconnect().await;
	}
}
