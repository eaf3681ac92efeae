//! The `Transport` boundary: everything the core needs from a single peer's
//! WebRTC connection, without depending on a concrete DTLS/SRTP/ICE/SCTP
//! implementation. A real deployment plugs in a Transport backed by an
//! actual WebRTC stack; this module only defines the contract plus an
//! in-process [`LoopbackTransport`] double used by the test suite.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use place_proto::{ChannelLabel, ClientId, SignallingPayload};
use tokio::sync::mpsc;

/// Whether the server is receiving media from, sending media to, or both,
/// relative to the publishing client.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StreamDirection {
	SendOnly,
	RecvOnly,
	SendRecv,
}

impl StreamDirection {
	/// Only streams whose direction includes *recv* (the server is
	/// receiving them from the sender) are eligible to become available to
	/// the SFU.
	pub fn includes_recv(&self) -> bool {
		matches!(self, StreamDirection::RecvOnly | StreamDirection::SendRecv)
	}
}

/// A media track as seen on a single Transport, before it has been wrapped
/// into a Place-wide [`crate::sfu::PlaceStreamId`].
#[derive(Debug, Clone)]
pub struct IncomingMediaStream {
	/// The sender-local track label. Must not contain dots: it becomes part
	/// of a dotted `PlaceStreamId`.
	pub local_media_id: String,
	pub direction: StreamDirection,
}

#[derive(Debug, Clone)]
pub enum MediaEvent {
	Available(IncomingMediaStream),
	Lost(String),
}

/// Everything a Transport can hand the core to process, in the order it
/// occurred on that connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
	Data { channel: ChannelLabel, payload: Bytes },
	Media(MediaEvent),
	/// The signalling state machine reached `stable`, e.g. after an
	/// offer/answer exchange completes.
	SignallingStable,
}

/// A single peer connection: signalling, data channels, and incoming media.
#[async_trait]
pub trait Transport: Send + Sync {
	fn client_id(&self) -> ClientId;

	/// Suspends until the local description is locked and ICE candidate
	/// gathering is complete.
	async fn generate_offer(&self) -> eyre::Result<SignallingPayload>;

	/// Applies a remote offer and builds the answer.
	async fn generate_answer(
		&self,
		offer: SignallingPayload,
	) -> eyre::Result<SignallingPayload>;

	/// Finalises the local-offer side of a renegotiation.
	async fn accept_answer(&self, answer: SignallingPayload) -> eyre::Result<()>;

	/// Aborts a locally proposed offer.
	async fn rollback_offer(&self) -> eyre::Result<()>;

	/// Non-blocking, best-effort send on the given channel.
	fn send(&self, channel: ChannelLabel, payload: Bytes) -> eyre::Result<()>;

	/// Idempotent.
	async fn disconnect(&self);

	/// Pulls the next event from this transport, in order. Returns `None`
	/// once the transport is closed and no further events will arrive.
	async fn recv(&self) -> Option<TransportEvent>;
}

/// A running media forwarder between two transports.
pub trait Forwarder: Send + Sync {
	/// Idempotent.
	fn stop(&self);
	/// The most recent transient error observed while forwarding, if any.
	fn last_error(&self) -> Option<(String, Instant)>;
}

/// Creates [`Forwarder`]s. Kept as an injected collaborator, mirroring
/// `Transport::forward` being declared `static` in the interface: starting a
/// forward doesn't belong to either endpoint's Transport alone.
#[async_trait]
pub trait MediaForwarding: Send + Sync {
	async fn forward(
		&self,
		local_media_id: &str,
		from: &dyn Transport,
		to: &dyn Transport,
	) -> eyre::Result<std::sync::Arc<dyn Forwarder>>;
}

/// Builds a [`Transport`] from an incoming SDP offer and returns the answer
/// to hand back over HTTP. The underlying DTLS/SRTP/ICE/SCTP stack is an
/// external collaborator; a real deployment plugs in an implementation
/// backed by an actual WebRTC peer connection here.
#[async_trait]
pub trait TransportFactory: Send + Sync {
	async fn create(
		&self,
		client_id: ClientId,
		offer: SignallingPayload,
	) -> eyre::Result<(std::sync::Arc<dyn Transport>, SignallingPayload)>;
}

/// The production extension point this crate leaves unfilled: a concrete
/// [`TransportFactory`] backed by a real DTLS/SRTP/ICE/SCTP stack is outside
/// this crate's scope (see the crate's module docs). [`crate::run`] wires
/// this placeholder in until a deployment provides its own.
pub struct UnconfiguredTransportFactory;

#[async_trait]
impl TransportFactory for UnconfiguredTransportFactory {
	async fn create(
		&self,
		_client_id: ClientId,
		_offer: SignallingPayload,
	) -> eyre::Result<(std::sync::Arc<dyn Transport>, SignallingPayload)> {
		Err(eyre::eyre!(
			"no WebRTC transport backend is configured; plug a concrete `TransportFactory` \
			 into place_server::run to accept real SDP offers"
		))
	}
}

/// The production counterpart to [`UnconfiguredTransportFactory`]: packet
/// forwarding itself is out of scope until a real media stack is wired in.
pub struct UnconfiguredMediaForwarding;

#[async_trait]
impl MediaForwarding for UnconfiguredMediaForwarding {
	async fn forward(
		&self,
		_local_media_id: &str,
		_from: &dyn Transport,
		_to: &dyn Transport,
	) -> eyre::Result<std::sync::Arc<dyn Forwarder>> {
		Err(eyre::eyre!(
			"no media forwarding backend is configured; plug a concrete `MediaForwarding` \
			 into place_server::run to actually forward RTP"
		))
	}
}

/// A [`TransportFactory`] that hands out [`LoopbackTransport`]s, ignoring the
/// offer it's given, and stashes the matching [`LoopbackRemote`] so a test can
/// retrieve it afterwards. Used by the HTTP endpoint's test suite.
#[derive(Default)]
pub struct LoopbackTransportFactory {
	remotes: Mutex<std::collections::HashMap<ClientId, LoopbackRemote>>,
}

impl LoopbackTransportFactory {
	pub fn take_remote(&self, client_id: ClientId) -> Option<LoopbackRemote> {
		self.remotes.lock().expect("poisoned").remove(&client_id)
	}
}

#[async_trait]
impl TransportFactory for LoopbackTransportFactory {
	async fn create(
		&self,
		client_id: ClientId,
		_offer: SignallingPayload,
	) -> eyre::Result<(std::sync::Arc<dyn Transport>, SignallingPayload)> {
		let (transport, remote) = LoopbackTransport::pair(client_id);
		self.remotes.lock().expect("poisoned").insert(client_id, remote);
		let answer = SignallingPayload::new("v=0 loopback-answer", vec![]);
		Ok((transport, answer))
	}
}

/// An in-process stand-in for a real WebRTC transport, wired to a peer via
/// plain channels. Used by the Session/Router/Orchestrator test suite to
/// exercise the core without a DTLS/ICE stack.
pub struct LoopbackTransport {
	client_id: ClientId,
	inbound: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
	outbound: mpsc::UnboundedSender<TransportEvent>,
	sent: Mutex<Vec<(ChannelLabel, Bytes)>>,
	disconnected: AtomicBool,
}

/// The test-side handle to a [`LoopbackTransport`]: lets a test simulate the
/// remote peer and inspect what the server sent.
pub struct LoopbackRemote {
	pub to_server: mpsc::UnboundedSender<TransportEvent>,
	pub from_server: mpsc::UnboundedReceiver<TransportEvent>,
}

impl LoopbackTransport {
	/// Builds a server-side transport plus the test handle used to drive it.
	pub fn pair(client_id: ClientId) -> (std::sync::Arc<Self>, LoopbackRemote) {
		let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
		let (from_server_tx, from_server_rx) = mpsc::unbounded_channel();
		let transport = Self {
			client_id,
			inbound: Mutex::new(to_server_rx),
			outbound: from_server_tx,
			sent: Mutex::new(Vec::new()),
			disconnected: AtomicBool::new(false),
		};
		(
			std::sync::Arc::new(transport),
			LoopbackRemote {
				to_server: to_server_tx,
				from_server: from_server_rx,
			},
		)
	}

	/// All payloads sent on `channel` so far, in order.
	pub fn sent_on(&self, channel: ChannelLabel) -> Vec<Bytes> {
		self.sent
			.lock()
			.expect("poisoned")
			.iter()
			.filter(|(c, _)| *c == channel)
			.map(|(_, payload)| payload.clone())
			.collect()
	}

	pub fn is_disconnected(&self) -> bool {
		self.disconnected.load(Ordering::Acquire)
	}
}

#[async_trait]
impl Transport for LoopbackTransport {
	fn client_id(&self) -> ClientId {
		self.client_id
	}

	async fn generate_offer(&self) -> eyre::Result<SignallingPayload> {
		Ok(SignallingPayload::new("v=0 loopback-offer", vec![]))
	}

	async fn generate_answer(
		&self,
		_offer: SignallingPayload,
	) -> eyre::Result<SignallingPayload> {
		Ok(SignallingPayload::new("v=0 loopback-answer", vec![]))
	}

	async fn accept_answer(&self, _answer: SignallingPayload) -> eyre::Result<()> {
		Ok(())
	}

	async fn rollback_offer(&self) -> eyre::Result<()> {
		Ok(())
	}

	fn send(&self, channel: ChannelLabel, payload: Bytes) -> eyre::Result<()> {
		self.sent.lock().expect("poisoned").push((channel, payload.clone()));
		// best-effort: a closed remote end is not an error for the sender.
		let _ = self.outbound.send(TransportEvent::Data { channel, payload });
		Ok(())
	}

	async fn disconnect(&self) {
		self.disconnected.store(true, Ordering::Release);
	}

	async fn recv(&self) -> Option<TransportEvent> {
		let mut guard = self.inbound.lock().expect("poisoned");
		guard.recv().await
	}
}

/// A no-op [`MediaForwarding`] and [`Forwarder`] used where tests only care
/// about which streams were started/stopped, not real packet flow.
#[derive(Default)]
pub struct RecordingForwarding {
	pub starts: Mutex<Vec<(String, ClientId, ClientId)>>,
	pub stops: std::sync::Arc<AtomicU64>,
}

struct RecordingForwarder {
	stops: std::sync::Arc<AtomicU64>,
	stopped: AtomicBool,
}

impl Forwarder for RecordingForwarder {
	fn stop(&self) {
		if !self.stopped.swap(true, Ordering::AcqRel) {
			self.stops.fetch_add(1, Ordering::SeqCst);
		}
	}

	fn last_error(&self) -> Option<(String, Instant)> {
		None
	}
}

#[async_trait]
impl MediaForwarding for RecordingForwarding {
	async fn forward(
		&self,
		local_media_id: &str,
		from: &dyn Transport,
		to: &dyn Transport,
	) -> eyre::Result<std::sync::Arc<dyn Forwarder>> {
		self.starts.lock().expect("poisoned").push((
			local_media_id.to_owned(),
			from.client_id(),
			to.client_id(),
		));
		Ok(std::sync::Arc::new(RecordingForwarder {
			stops: std::sync::Arc::clone(&self.stops),
			stopped: AtomicBool::new(false),
		}))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn send_records_payload_and_forwards_to_remote() {
		let (transport, mut remote) = LoopbackTransport::pair(ClientId::random());
		transport
			.send(ChannelLabel::Interactions, Bytes::from_static(b"hi"))
			.unwrap();
		assert_eq!(transport.sent_on(ChannelLabel::Interactions), vec![Bytes::from_static(b"hi")]);
		let event = remote.from_server.recv().await.unwrap();
		assert!(matches!(event, TransportEvent::Data { channel: ChannelLabel::Interactions, .. }));
	}

	#[tokio::test]
	async fn recv_observes_events_sent_by_remote() {
		let (transport, remote) = LoopbackTransport::pair(ClientId::random());
		remote
			.to_server
			.send(TransportEvent::Data {
				channel: ChannelLabel::Worldstate,
				payload: Bytes::from_static(b"intent"),
			})
			.unwrap();
		let event = transport.recv().await.unwrap();
		assert!(matches!(event, TransportEvent::Data { channel: ChannelLabel::Worldstate, .. }));
	}

	#[tokio::test]
	async fn recording_forwarding_tracks_start_and_stop() {
		let forwarding = RecordingForwarding::default();
		let (a, _ra) = LoopbackTransport::pair(ClientId::random());
		let (b, _rb) = LoopbackTransport::pair(ClientId::random());
		let fwd = forwarding.forward("voice-mic", a.as_ref(), b.as_ref()).await.unwrap();
		assert_eq!(forwarding.starts.lock().unwrap().len(), 1);
		fwd.stop();
		fwd.stop();
		assert_eq!(forwarding.stops.load(Ordering::SeqCst), 1);
	}
}
