//! Internal error types for each subsystem. These are `thiserror`-derived so
//! they compose with `?` inside the server; they are mapped to the nearest
//! [`place_proto::PlaceErrorCode`] only at the boundary where an operation's
//! outcome becomes an `Interaction::Error` sent back to a client.

use place_proto::PlaceErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
	#[error("change targets nonexistent entity {0:?}")]
	NoSuchEntity(place_proto::EntityId),
	#[error("change targets nonexistent component ({1:?}, {0:?})")]
	NoSuchComponent(place_proto::EntityId, place_proto::ComponentTypeId),
	#[error("revision {0} is not in history")]
	RevisionNotFound(place_proto::StateRevision),
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
	#[error("sender does not own entity {0:?}")]
	Unauthorized(place_proto::EntityId),
	#[error("no such receiver entity {0:?}")]
	RecipientUnavailable(place_proto::EntityId),
	#[error("no response for request within timeout")]
	RecipientTimedOut,
	#[error("response {0:?} did not match any outstanding request")]
	InvalidResponse(place_proto::RequestId),
	#[error("entity or component not found")]
	NotFound,
	#[error("client announced with incompatible version {client}, server is {server}")]
	IncompatibleVersion {
		client: place_proto::Version,
		server: place_proto::Version,
	},
	#[error("malformed request: {0}")]
	InvalidRequest(String),
	#[error("authentication provider rejected the announcing client")]
	AuthenticationRejected,
}

impl RouterError {
	pub fn code(&self) -> PlaceErrorCode {
		match self {
			RouterError::Unauthorized(_) => PlaceErrorCode::Unauthorized,
			RouterError::RecipientUnavailable(_) => PlaceErrorCode::RecipientUnavailable,
			RouterError::RecipientTimedOut => PlaceErrorCode::RecipientTimedOut,
			RouterError::InvalidResponse(_) => PlaceErrorCode::InvalidResponse,
			RouterError::NotFound => PlaceErrorCode::NotFound,
			RouterError::IncompatibleVersion { .. } => {
				PlaceErrorCode::IncompatibleProtocolVersion
			}
			RouterError::InvalidRequest(_) => PlaceErrorCode::InvalidRequest,
			RouterError::AuthenticationRejected => PlaceErrorCode::Unauthorized,
		}
	}

	/// Whether this error is fatal to the *connection* (spec.md §7: the
	/// server disconnects the offending client after delivering the error
	/// response). Distinct from [`PlaceErrorCode::is_fatal`], which a plain
	/// per-request `Unauthorized` (e.g. a failed ownership check on
	/// `removeEntity`) does not satisfy even though authentication rejection,
	/// which also carries an `Unauthorized` wire code, does.
	pub fn is_connection_fatal(&self) -> bool {
		matches!(
			self,
			RouterError::IncompatibleVersion { .. } | RouterError::AuthenticationRejected
		)
	}

	pub fn into_place_error(self) -> place_proto::PlaceError {
		let code = self.code();
		place_proto::PlaceError::place(code, self.to_string())
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error("decode error on channel {channel:?}: {source}")]
	Decode {
		channel: place_proto::ChannelLabel,
		#[source]
		source: serde_json::Error,
	},
	#[error("renegotiation failed: {0}")]
	FailedRenegotiation(String),
	#[error(transparent)]
	Transport(#[from] eyre::Report),
}
