//! The HTTP Signalling Endpoint (component H, spec.md §4.H): `POST /`
//! accepts an SDP offer and returns the server's answer; `GET /` serves a
//! landing page with a link that launches the configured client app.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use place_proto::SignallingPayload;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::orchestrator::Orchestrator;

/// The parts of the CLI surface that shape the `GET /` landing page and the
/// app launch link it offers, independent of place-state concerns.
#[derive(Debug, Clone)]
pub struct AppLaunchConfig {
	pub place_name: String,
	pub app_name: String,
	pub app_download_url: Option<String>,
	pub app_url_protocol: String,
}

impl AppLaunchConfig {
	fn launch_url(&self) -> String {
		let encoded_name: String = url::form_urlencoded::byte_serialize(self.place_name.as_bytes()).collect();
		format!("{}://join?name={}", self.app_url_protocol, encoded_name)
	}

	fn landing_page_html(&self) -> String {
		let launch_url = self.launch_url();
		let download_link = match &self.app_download_url {
			Some(url) => format!(r#"<p><a href="{url}">Don't have {app}? Get it here.</a></p>"#, app = html_escape(&self.app_name)),
			None => String::new(),
		};
		format!(
			r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{name} &mdash; {app}</title></head>
<body>
<h1>{name}</h1>
<p><a href="{launch_url}">Launch in {app}</a></p>
{download_link}
</body>
</html>"#,
			name = html_escape(&self.place_name),
			app = html_escape(&self.app_name),
		)
	}
}

fn html_escape(s: &str) -> String {
	s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[derive(Clone)]
struct AppState {
	orchestrator: Arc<Orchestrator>,
	launch: Arc<AppLaunchConfig>,
}

/// Builds the router hosting both routes of spec.md §4.H. An optional
/// dashboard surface at `/dashboard` is explicitly out of scope (spec.md
/// §4.H) and is not added here.
pub fn router(orchestrator: Arc<Orchestrator>, launch: AppLaunchConfig) -> Router {
	let state = AppState { orchestrator, launch: Arc::new(launch) };
	Router::new()
		.route("/", get(landing_page).post(handshake))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
}

async fn handshake(State(state): State<AppState>, Json(offer): Json<SignallingPayload>) -> axum::response::Response {
	match state.orchestrator.connect(offer).await {
		Ok(answer) => (StatusCode::OK, Json(answer)).into_response(),
		Err(source) => {
			warn!(%source, "signalling handshake failed");
			(StatusCode::INTERNAL_SERVER_ERROR, source.to_string()).into_response()
		}
	}
}

async fn landing_page(State(state): State<AppState>) -> Html<String> {
	Html(state.launch.landing_page_html())
}
