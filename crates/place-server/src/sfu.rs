//! Set-reconciliation SFU: decides which published media streams need to be
//! forwarded to which subscribers, and starts/stops forwarders to match.
//!
//! Nothing here speaks RTP. It only tracks three sets -- available, desired,
//! active -- and reconciles them; the actual packet path is delegated to a
//! [`crate::transport::MediaForwarding`] implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use place_proto::{ClientId, PlaceContents};
use tracing::{debug, warn};

use crate::directory::ClientDirectory;
use crate::transport::{Forwarder, MediaForwarding, StreamDirection};

/// Names a single published media stream: who publishes it, and the
/// publisher-local id it was given. Not guaranteed globally unique at the
/// type level -- publishers are expected to pick ids that don't collide with
/// their own other streams, and the pair (publisher, local id) is what's
/// actually tracked.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PlaceStreamId {
	pub publisher: ClientId,
	pub local_media_id: String,
}

impl PlaceStreamId {
	pub fn new(publisher: ClientId, local_media_id: impl Into<String>) -> Self {
		Self { publisher, local_media_id: local_media_id.into() }
	}
}

impl std::fmt::Display for PlaceStreamId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}", self.publisher.short_form(), self.local_media_id)
	}
}

/// A running forward from `stream.publisher`'s transport to `subscriber`'s.
#[derive(Eq, PartialEq, Hash, Clone)]
struct ForwardingId {
	stream: PlaceStreamId,
	subscriber: ClientId,
}

pub struct SfuReconciler {
	directory: std::sync::Arc<dyn ClientDirectory>,
	forwarding: std::sync::Arc<dyn MediaForwarding>,
	/// Streams currently available to forward from, as reported by each
	/// publisher's transport.
	available: Mutex<HashSet<PlaceStreamId>>,
	active: Mutex<HashMap<ForwardingId, std::sync::Arc<dyn Forwarder>>>,
}

impl SfuReconciler {
	pub fn new(
		directory: std::sync::Arc<dyn ClientDirectory>,
		forwarding: std::sync::Arc<dyn MediaForwarding>,
	) -> Self {
		Self {
			directory,
			forwarding,
			available: Mutex::new(HashSet::new()),
			active: Mutex::new(HashMap::new()),
		}
	}

	pub fn mark_available(&self, publisher: ClientId, local_media_id: String, direction: StreamDirection) {
		if !direction.includes_recv() {
			return;
		}
		self.available
			.lock()
			.expect("poisoned")
			.insert(PlaceStreamId::new(publisher, local_media_id));
	}

	pub fn mark_unavailable(&self, publisher: ClientId, local_media_id: &str) {
		self.available
			.lock()
			.expect("poisoned")
			.remove(&PlaceStreamId::new(publisher, local_media_id));
	}

	/// The streams every subscriber desires right now, read from each
	/// client's `LiveMediaListener` component.
	fn desired(&self, contents: &PlaceContents) -> Vec<(ClientId, PlaceStreamId)> {
		let type_id = place_proto::ComponentTypeId::new("LiveMediaListener");
		let Some(listeners) = contents.components.get(&type_id) else {
			return Vec::new();
		};
		let mut wanted = Vec::new();
		for (entity_id, component) in listeners {
			let place_proto::Component::LiveMediaListener { media_ids } = component else {
				continue;
			};
			let Some(subscriber) = contents.entities.get(entity_id).map(|e| e.owner_client_id) else {
				continue;
			};
			for raw in media_ids {
				if let Some(stream) = self.available.lock().expect("poisoned").iter().find(|s| &s.to_string() == raw) {
					wanted.push((subscriber, stream.clone()));
				}
			}
		}
		wanted
	}

	/// Starts forwards that became desired, stops ones that are no longer
	/// wanted. Safe to call repeatedly; a stream that failed to start last
	/// time is retried here since it's still absent from `active`.
	pub async fn reconcile(&self, contents: &PlaceContents) {
		let wanted: HashSet<ForwardingId> = self
			.desired(contents)
			.into_iter()
			.filter(|(subscriber, stream)| *subscriber != stream.publisher) // no self-forward
			.map(|(subscriber, stream)| ForwardingId { stream, subscriber })
			.collect();

		let to_stop: Vec<ForwardingId> = {
			let active = self.active.lock().expect("poisoned");
			active.keys().filter(|id| !wanted.contains(id)).cloned().collect()
		};
		for id in to_stop {
			if let Some(forwarder) = self.active.lock().expect("poisoned").remove(&id) {
				forwarder.stop();
				debug!(stream = %id.stream, subscriber = %id.subscriber, "stopped forward");
			}
		}

		let to_start: Vec<ForwardingId> = {
			let active = self.active.lock().expect("poisoned");
			wanted.iter().filter(|id| !active.contains_key(id)).cloned().collect()
		};
		for id in to_start {
			let (Some(publisher_transport), Some(subscriber_transport)) = (
				self.directory.transport(id.stream.publisher),
				self.directory.transport(id.subscriber),
			) else {
				continue;
			};
			match self
				.forwarding
				.forward(&id.stream.local_media_id, publisher_transport.as_ref(), subscriber_transport.as_ref())
				.await
			{
				Ok(forwarder) => {
					debug!(stream = %id.stream, subscriber = %id.subscriber, "started forward");
					self.active.lock().expect("poisoned").insert(id, forwarder);
				}
				Err(source) => {
					warn!(?source, stream = %id.stream, subscriber = %id.subscriber, "failed to start forward, will retry");
				}
			}
		}
	}
}
