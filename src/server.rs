use crate::router::{InboundRequest, Router};
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

/// Frontend adapter: turns `POST /` bodies into router calls and writes the
/// routed response back verbatim.
#[derive(Clone)]
pub struct App {
	router: Arc<Router>,
}

impl App {
	pub fn new(router: Arc<Router>) -> Self {
		Self { router }
	}

	pub fn router(&self) -> axum::Router {
		axum::Router::new()
			.route("/", post(handle_rpc))
			.with_state(self.clone())
	}
}

async fn handle_rpc(State(app): State<App>, headers: HeaderMap, body: Bytes) -> Response {
	let parsed: Value = match serde_json::from_slice(&body) {
		Ok(parsed) => parsed,
		Err(e) => {
			warn!("unparseable json-rpc body: {}", e);
			return parse_error_response();
		},
	};
	let Some(method) = parsed["method"].as_str().map(str::to_owned) else {
		warn!("json-rpc body without a method");
		return parse_error_response();
	};
	debug!("received {} request", method);

	let req = InboundRequest {
		body,
		headers,
		method,
		json: parsed,
	};
	// detached from the connection: a consensus client that gives up must
	// not cancel work the backends still need to see
	let router = app.router.clone();
	let routed = match tokio::spawn(async move { router.route(req).await }).await {
		Ok(routed) => routed,
		Err(e) => {
			warn!("routing task failed: {}", e);
			return StatusCode::BAD_GATEWAY.into_response();
		},
	};

	if routed.is_transport_error() {
		// no backend produced an HTTP response for us to relay
		return StatusCode::BAD_GATEWAY.into_response();
	}

	let status = StatusCode::from_u16(routed.status).unwrap_or(StatusCode::BAD_GATEWAY);
	(status, routed.headers, Body::from(routed.body)).into_response()
}

/// JSON-RPC parse error, answered without involving the router.
fn parse_error_response() -> Response {
	axum::Json(json!({
		"jsonrpc": "2.0",
		"id": null,
		"error": { "code": -32700, "message": "Parse error" }
	}))
	.into_response()
}
