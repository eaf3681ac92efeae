//! The wire-level error taxonomy carried in `Interaction::Error` bodies.
//!
//! These are distinct from the internal `thiserror` enums used inside the
//! server's own subsystems (see `place_server::errors`): a `PlaceErrorCode`
//! is what crosses the wire to a client, and internal errors are mapped to
//! the nearest one at the boundary where they become an Interaction
//! response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PlaceErrorCode {
	/// Message not understood for this recipient.
	InvalidRequest,
	/// Entity/component does not exist.
	NotFound,
	/// Sender does not own the target.
	Unauthorized,
	/// No such receiver entity, or its owner disconnected.
	RecipientUnavailable,
	/// No response within the request timeout.
	RecipientTimedOut,
	/// Unknown or mis-targeted response.
	InvalidResponse,
	/// Server/client version mismatch. Fatal.
	IncompatibleProtocolVersion,
	/// Impolite side rejecting a glare offer.
	DiscardedRenegotiation,
	/// Unexpected answer body during renegotiation.
	FailedRenegotiation,
	/// HTTP handshake error.
	FailedSignalling,
	/// Unspecified internal failure. Fatal.
	InternalServerError,
}

impl PlaceErrorCode {
	/// Whether this error is fatal to the connection: the server disconnects
	/// the offending client after delivering the response carrying it.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			PlaceErrorCode::IncompatibleProtocolVersion
				| PlaceErrorCode::InternalServerError
				| PlaceErrorCode::FailedRenegotiation
		)
	}
}

/// The body of an `Interaction::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceError {
	pub domain: String,
	pub code: PlaceErrorCode,
	pub description: String,
}

impl PlaceError {
	pub fn new(
		domain: impl Into<String>,
		code: PlaceErrorCode,
		description: impl Into<String>,
	) -> Self {
		Self {
			domain: domain.into(),
			code,
			description: description.into(),
		}
	}

	/// Shorthand for errors originating from the place itself, as opposed to
	/// a forwarded peer error.
	pub fn place(code: PlaceErrorCode, description: impl Into<String>) -> Self {
		Self::new("place", code, description)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn fatal_codes_are_exactly_the_documented_three() {
		use PlaceErrorCode::*;
		let fatal: Vec<_> = [
			InvalidRequest,
			NotFound,
			Unauthorized,
			RecipientUnavailable,
			RecipientTimedOut,
			InvalidResponse,
			IncompatibleProtocolVersion,
			DiscardedRenegotiation,
			FailedRenegotiation,
			FailedSignalling,
			InternalServerError,
		]
		.into_iter()
		.filter(PlaceErrorCode::is_fatal)
		.collect();
		assert_eq!(
			fatal,
			vec![IncompatibleProtocolVersion, FailedRenegotiation, InternalServerError]
		);
	}
}
