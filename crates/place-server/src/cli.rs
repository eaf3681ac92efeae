//! Command-line configuration surface (spec.md §6 CLI surface).
//!
//! The concrete WebRTC backend (ICE port range reservation, candidate IP
//! rewriting) lives outside this crate's scope; the fields below are parsed
//! and validated here so they're ready to hand to whatever `TransportFactory`
//! a deployment wires in at `crate::run`'s call site.

use std::net::IpAddr;
use std::str::FromStr;

use clap::Parser;

/// An ICE candidate IP rewrite rule, `from-to`: replace candidate addresses
/// equal to `from` with `to` before handing them to a client, e.g. when the
/// server is reachable only via a NAT'd public address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpOverride {
	pub from: IpAddr,
	pub to: IpAddr,
}

impl FromStr for IpOverride {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (from, to) = s
			.split_once('-')
			.ok_or_else(|| format!("expected `from-to`, got {s:?}"))?;
		Ok(Self {
			from: from.parse().map_err(|e| format!("invalid `from` address {from:?}: {e}"))?,
			to: to.parse().map_err(|e| format!("invalid `to` address {to:?}: {e}"))?,
		})
	}
}

/// An inclusive `min-max` UDP port range reserved for the WebRTC ICE agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
	pub min: u16,
	pub max: u16,
}

impl FromStr for PortRange {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (min, max) = s
			.split_once('-')
			.ok_or_else(|| format!("expected `min-max`, got {s:?}"))?;
		let min: u16 = min.parse().map_err(|e| format!("invalid min port {min:?}: {e}"))?;
		let max: u16 = max.parse().map_err(|e| format!("invalid max port {max:?}: {e}"))?;
		if min > max {
			return Err(format!("port range min {min} is greater than max {max}"));
		}
		Ok(Self { min, max })
	}
}

impl std::fmt::Display for PortRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}-{}", self.min, self.max)
	}
}

#[derive(Parser, Debug, Clone)]
#[command(
	author,
	version,
	about = "The authoritative scene-graph, signalling and SFU core of a single Place"
)]
pub struct Cli {
	/// Display name for this place, shown to clients in `announceResponse`
	/// and on the HTTP landing page.
	#[arg(long, default_value = "Place")]
	pub name: String,

	/// Rewrite ICE candidate IPs from one address to another, e.g. for a host
	/// sitting behind a static NAT mapping. Format: `from-to`.
	#[arg(long, value_name = "FROM-TO")]
	pub ip_override: Option<IpOverride>,

	/// Port the HTTP signalling endpoint listens on.
	#[arg(long, default_value_t = 9080)]
	pub http_port: u16,

	/// Inclusive UDP port range reserved for WebRTC ICE candidates.
	/// Format: `min-max`.
	#[arg(long, default_value = "10000-11000")]
	pub webrtc_port_range: PortRange,

	/// Name of the client app advertised on the landing page and used to
	/// build its launch link.
	#[arg(long, default_value = "Alloverse")]
	pub app_name: String,

	/// Download URL offered on the landing page for visitors without the app
	/// installed.
	#[arg(long)]
	pub app_download_url: Option<String>,

	/// URL scheme used to build the landing page's launch link, e.g.
	/// `alloapp`.
	#[arg(long, default_value = "alloapp")]
	pub app_url_protocol: String,

	/// Auth token the client app must present alongside its announce to join
	/// this place, if set.
	#[arg(long, env = "ALLO_APP_AUTH_TOKEN")]
	pub allo_app_auth_token: Option<String>,
}
