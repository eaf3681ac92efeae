//! The Place Server core: a revisioned scene-graph store, a per-client
//! signalling/session state machine, the interaction router between clients
//! and the place, and the SFU reconciler that drives media forwarding.
//!
//! The underlying WebRTC peer implementation (DTLS/SRTP/ICE/SCTP) is
//! deliberately out of this crate's scope: [`transport::Transport`] and
//! [`transport::TransportFactory`] are the seam a deployment plugs a real
//! stack into. [`run`] wires the HTTP signalling endpoint and the
//! Orchestrator together around [`transport::UnconfiguredTransportFactory`]
//! until one is provided.

pub mod cli;
pub mod directory;
pub mod errors;
pub mod heartbeat;
pub mod http;
pub mod orchestrator;
pub mod router;
pub mod scene_store;
pub mod session;
pub mod sfu;
pub mod transport;

use std::sync::Arc;

use color_eyre::eyre::Context;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::transport::{MediaForwarding, TransportFactory, UnconfiguredMediaForwarding, UnconfiguredTransportFactory};

/// Installs error reporting and the `tracing` subscriber (registry + an
/// `EnvFilter` read from `RUST_LOG`, default `info`, + the `fmt` layer), then
/// runs the server until it receives SIGINT.
pub async fn run(cli: Cli) -> color_eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.with(tracing_subscriber::fmt::layer())
		.init();

	if let Some(over) = cli.ip_override {
		info!(from = %over.from, to = %over.to, "ICE candidate IP override configured");
	}
	info!(range = %cli.webrtc_port_range, "WebRTC ICE port range configured");
	if cli.allo_app_auth_token.is_some() {
		info!("app auth token configured");
	}

	let config = OrchestratorConfig { place_name: cli.name.clone(), ..OrchestratorConfig::default() };
	let transport_factory: Arc<dyn TransportFactory> = Arc::new(UnconfiguredTransportFactory);
	let forwarding: Arc<dyn MediaForwarding> = Arc::new(UnconfiguredMediaForwarding);
	let orchestrator = Orchestrator::new(config, transport_factory, forwarding);

	let launch = http::AppLaunchConfig {
		place_name: cli.name.clone(),
		app_name: cli.app_name.clone(),
		app_download_url: cli.app_download_url.clone(),
		app_url_protocol: cli.app_url_protocol.clone(),
	};
	let app = http::router(orchestrator, launch);

	let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.http_port))
		.await
		.wrap_err_with(|| format!("failed to bind HTTP signalling listener on port {}", cli.http_port))?;
	info!(addr = %listener.local_addr()?, place = %cli.name, "place server listening");

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.wrap_err("HTTP server failed")?;
	Ok(())
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("received SIGINT, shutting down");
}
