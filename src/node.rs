use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{error, info};

/// Liveness label for one backend execution node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Health {
	Offline = 0,
	Healthy = 1,
	Syncing = 2,
}

impl Health {
	fn from_u8(value: u8) -> Health {
		match value {
			1 => Health::Healthy,
			2 => Health::Syncing,
			_ => Health::Offline,
		}
	}
}

/// What came back from a backend. `status == 0` means the transport failed
/// and no HTTP response exists.
#[derive(Clone, Debug)]
pub struct RpcResponse {
	pub status: u16,
	pub body: Bytes,
	pub headers: HeaderMap,
}

impl RpcResponse {
	pub fn transport_error() -> Self {
		Self {
			status: 0,
			body: Bytes::new(),
			headers: HeaderMap::new(),
		}
	}

	pub fn is_transport_error(&self) -> bool {
		self.status == 0
	}
}

/// One backend EL endpoint. The label is a plain atomic store: whichever
/// task last proved the node online, offline or syncing wins, and
/// concurrent writers converge on the same values.
pub struct Node {
	pub url: String,
	client: reqwest::Client,
	health: AtomicU8,
}

impl Node {
	pub fn new(url: String, client: reqwest::Client) -> Self {
		Self {
			url,
			client,
			health: AtomicU8::new(Health::Offline as u8),
		}
	}

	pub fn health(&self) -> Health {
		Health::from_u8(self.health.load(Ordering::Relaxed))
	}

	pub fn mark_healthy(&self) {
		if self.transition(Health::Healthy) {
			info!("node {} is online", self.url);
		}
	}

	pub fn mark_offline(&self) {
		if self.transition(Health::Offline) {
			info!("node {} is offline", self.url);
		}
	}

	pub fn mark_syncing(&self) {
		if self.transition(Health::Syncing) {
			info!("node {} is alive but currently syncing", self.url);
		}
	}

	/// Re-asserting the current label is a no-op and must not log.
	fn transition(&self, next: Health) -> bool {
		self.health.swap(next as u8, Ordering::Relaxed) != next as u8
	}

	/// Unauthenticated POST to the backend. Routed requests already carry
	/// the caller's auth header.
	pub async fn post(&self, body: Bytes, mut headers: HeaderMap) -> RpcResponse {
		// bodies get compared byte-for-byte during reconciliation, so never
		// let a backend compress them
		headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
		let sent = self
			.client
			.post(&self.url)
			.headers(headers)
			.body(body)
			.send()
			.await;
		self.read_response(sent).await
	}

	/// POST with a bearer token, for the authenticated engine port. Only
	/// the health prober calls this.
	pub async fn post_with_jwt(
		&self,
		body: Bytes,
		mut headers: HeaderMap,
		token: &str,
	) -> RpcResponse {
		headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
		let sent = self
			.client
			.post(&self.url)
			.headers(headers)
			.bearer_auth(token)
			.body(body)
			.send()
			.await;
		self.read_response(sent).await
	}

	async fn read_response(
		&self,
		sent: Result<reqwest::Response, reqwest::Error>,
	) -> RpcResponse {
		let resp = match sent {
			Ok(resp) => resp,
			Err(e) => {
				self.mark_offline();
				error!("request to {} failed: {}", self.url, e);
				return RpcResponse::transport_error();
			},
		};
		let status = resp.status().as_u16();
		let mut headers = resp.headers().clone();
		// the frontend server re-decides chunking for its own reply
		headers.remove(TRANSFER_ENCODING);
		match resp.bytes().await {
			Ok(body) => RpcResponse {
				status,
				body,
				headers,
			},
			Err(e) => {
				self.mark_offline();
				error!("request to {} failed: {}", self.url, e);
				RpcResponse::transport_error()
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn labels_round_trip_and_converge() {
		let node = Node::new("http://127.0.0.1:1".to_string(), reqwest::Client::new());
		assert_eq!(node.health(), Health::Offline);

		node.mark_healthy();
		assert_eq!(node.health(), Health::Healthy);
		// idempotent re-assertion
		node.mark_healthy();
		assert_eq!(node.health(), Health::Healthy);

		node.mark_syncing();
		assert_eq!(node.health(), Health::Syncing);
		node.mark_offline();
		assert_eq!(node.health(), Health::Offline);
	}
}
