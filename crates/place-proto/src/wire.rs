//! HTTP signalling payloads and data-channel framing constants.

use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
	pub sdp_mid: String,
	pub sdp_m_line_index: i32,
	pub sdp: String,
	pub server_url: Option<String>,
}

/// The JSON body exchanged with `POST /`: an offer from the client, an
/// answer from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignallingPayload {
	pub sdp: String,
	pub candidates: Vec<IceCandidate>,
	pub client_id: Option<ClientId>,
}

impl SignallingPayload {
	pub fn new(sdp: impl Into<String>, candidates: Vec<IceCandidate>) -> Self {
		Self {
			sdp: sdp.into(),
			candidates,
			client_id: None,
		}
	}
}

/// The fixed, reserved enumeration of data channel labels. Stream ids are
/// stable so both sides can open matching negotiated channels without
/// exchanging channel metadata out of band.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ChannelLabel {
	/// Reliable, ordered. Carries [`crate::interaction::Interaction`] values.
	Interactions,
	/// Unreliable, unordered. Carries server->client
	/// [`crate::scene::PlaceChangeSet`] and client->server
	/// [`crate::scene::Intent`].
	Worldstate,
	/// Reliable. Carries client->server stored log messages.
	Logs,
}

impl ChannelLabel {
	/// The negotiated SCTP stream id. Fixed so neither side needs to
	/// exchange channel metadata to agree on which channel is which.
	pub const fn stream_id(&self) -> u16 {
		match self {
			ChannelLabel::Interactions => 1,
			ChannelLabel::Worldstate => 2,
			ChannelLabel::Logs => 3,
		}
	}

	pub const fn reliable(&self) -> bool {
		match self {
			ChannelLabel::Interactions => true,
			ChannelLabel::Worldstate => false,
			ChannelLabel::Logs => true,
		}
	}

	pub const fn label(&self) -> &'static str {
		match self {
			ChannelLabel::Interactions => "interactions",
			ChannelLabel::Worldstate => "worldstate",
			ChannelLabel::Logs => "logs",
		}
	}

	pub const ALL: [ChannelLabel; 3] = [
		ChannelLabel::Interactions,
		ChannelLabel::Worldstate,
		ChannelLabel::Logs,
	];
}

/// Encodes a wire message into the deterministic, self-describing scheme
/// (tagged JSON) used for every data-channel payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
	serde_json::to_vec(value)
}

/// Decodes a wire message encoded with [`encode`].
pub fn decode<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T, serde_json::Error> {
	serde_json::from_slice(bytes)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn channel_stream_ids_and_reliability_are_fixed() {
		assert_eq!(ChannelLabel::Interactions.stream_id(), 1);
		assert!(ChannelLabel::Interactions.reliable());
		assert_eq!(ChannelLabel::Worldstate.stream_id(), 2);
		assert!(!ChannelLabel::Worldstate.reliable());
		assert_eq!(ChannelLabel::Logs.stream_id(), 3);
		assert!(ChannelLabel::Logs.reliable());
	}

	#[test]
	fn encode_decode_round_trips() {
		let payload = SignallingPayload::new("v=0", vec![]);
		let bytes = encode(&payload).unwrap();
		let decoded: SignallingPayload = decode(&bytes).unwrap();
		assert_eq!(decoded, payload);
	}
}
