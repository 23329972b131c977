use crate::auth::JwtSecret;
use crate::fleet::{Fleet, FleetView};
use crate::node::{Health, Node, RpcResponse};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, trace};

pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

const SYNCING_PROBE: &str = r#"{"id":1,"jsonrpc":"2.0","method":"eth_syncing","params":[]}"#;

/// Result of probing one backend: which node, the label it earned, and how
/// long the round trip took. Indices keep the outcome detached from the
/// fleet it will be folded back into.
#[derive(Clone, Copy, Debug)]
pub struct ProbeOutcome {
	pub node: usize,
	pub health: Health,
	pub elapsed: Duration,
}

/// Probes every backend over the authenticated engine port and republishes
/// the fleet view. Runs on a 30 second cadence, plus on demand whenever a
/// dispatcher finds no healthy node.
#[derive(Clone)]
pub struct HealthProber {
	fleet: Arc<Fleet>,
	secret: Arc<JwtSecret>,
}

impl HealthProber {
	pub fn new(fleet: Arc<Fleet>, secret: Arc<JwtSecret>) -> Self {
		Self { fleet, secret }
	}

	/// One probe cycle: mint a fresh token per node, fire all probes
	/// concurrently, classify, and publish a rebuilt view. Never fails; a
	/// cycle that finds nothing healthy publishes an empty healthy list and
	/// leaves recovery to the next dispatch.
	pub async fn run_cycle(&self) {
		let probes = self.fleet.nodes().iter().enumerate().map(|(idx, node)| {
			let node = node.clone();
			let secret = self.secret.clone();
			async move {
				let token = match secret.sign() {
					Ok(token) => token,
					Err(e) => {
						node.mark_offline();
						error!("could not mint probe token for {}: {}", node.url, e);
						return ProbeOutcome {
							node: idx,
							health: Health::Offline,
							elapsed: Duration::ZERO,
						};
					},
				};
				let started = Instant::now();
				let resp = node
					.post_with_jwt(
						Bytes::from_static(SYNCING_PROBE.as_bytes()),
						json_headers(),
						&token,
					)
					.await;
				ProbeOutcome {
					node: idx,
					health: classify(&node, &resp),
					elapsed: started.elapsed(),
				}
			}
		});
		let outcomes = futures::future::join_all(probes).await;
		self.fleet.publish(bucket(&outcomes));
		trace!("probe cycle complete");
	}

	/// The scheduled trigger. The startup probe has already run by the time
	/// this is spawned, so sleep first.
	pub async fn run(self) {
		loop {
			tokio::time::sleep(PROBE_INTERVAL).await;
			self.run_cycle().await;
		}
	}
}

fn json_headers() -> HeaderMap {
	let mut headers = HeaderMap::new();
	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	headers
}

/// Classification table for an `eth_syncing` reply. A boolean result is the
/// standard "not syncing" answer; a progress object means the node is alive
/// but behind.
fn classify(node: &Node, resp: &RpcResponse) -> Health {
	if resp.is_transport_error() {
		// post_with_jwt already relabeled and logged
		return Health::Offline;
	}
	let parsed: serde_json::Value = match serde_json::from_slice(&resp.body) {
		Ok(parsed) => parsed,
		Err(e) => {
			node.mark_offline();
			error!("error parsing probe response from {}: {}", node.url, e);
			error!("response body: {}", String::from_utf8_lossy(&resp.body));
			return Health::Offline;
		},
	};
	if !parsed["error"].is_null() {
		node.mark_offline();
		error!("error while checking node {}: {}", node.url, parsed["error"]);
		return Health::Offline;
	}
	if parsed["result"].is_boolean() {
		node.mark_healthy();
		return Health::Healthy;
	}
	node.mark_syncing();
	Health::Syncing
}

/// Rebuild the three fleet lists from scratch, healthy sorted by ascending
/// round-trip time so the fastest node becomes the routing preference.
fn bucket(outcomes: &[ProbeOutcome]) -> FleetView {
	let mut view = FleetView::default();
	let mut timed: Vec<(Duration, usize)> = Vec::new();
	for outcome in outcomes {
		match outcome.health {
			Health::Healthy => timed.push((outcome.elapsed, outcome.node)),
			Health::Syncing => view.syncing.push(outcome.node),
			Health::Offline => view.offline.push(outcome.node),
		}
	}
	timed.sort_by_key(|(elapsed, _)| *elapsed);
	view.healthy = timed.into_iter().map(|(_, node)| node).collect();
	view
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node() -> Node {
		Node::new("http://127.0.0.1:1".to_string(), reqwest::Client::new())
	}

	fn response(body: &str) -> RpcResponse {
		RpcResponse {
			status: 200,
			body: Bytes::from(body.to_string()),
			headers: HeaderMap::new(),
		}
	}

	#[test]
	fn boolean_result_is_healthy() {
		let node = node();
		let resp = response(r#"{"jsonrpc":"2.0","id":1,"result":false}"#);
		assert_eq!(classify(&node, &resp), Health::Healthy);
		assert_eq!(node.health(), Health::Healthy);
	}

	#[test]
	fn progress_object_is_syncing() {
		let node = node();
		let resp = response(
			r#"{"jsonrpc":"2.0","id":1,"result":{"startingBlock":"0x0","currentBlock":"0x1","highestBlock":"0x2"}}"#,
		);
		assert_eq!(classify(&node, &resp), Health::Syncing);
		assert_eq!(node.health(), Health::Syncing);
	}

	#[test]
	fn rpc_error_is_offline() {
		let node = node();
		node.mark_healthy();
		let resp = response(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nope"}}"#);
		assert_eq!(classify(&node, &resp), Health::Offline);
		assert_eq!(node.health(), Health::Offline);
	}

	#[test]
	fn garbage_body_is_offline() {
		let node = node();
		let resp = response("not json at all");
		assert_eq!(classify(&node, &resp), Health::Offline);
	}

	#[test]
	fn transport_error_is_offline() {
		let node = node();
		assert_eq!(
			classify(&node, &RpcResponse::transport_error()),
			Health::Offline
		);
	}

	#[test]
	fn bucket_partitions_the_node_set() {
		let outcomes = [
			ProbeOutcome {
				node: 0,
				health: Health::Syncing,
				elapsed: Duration::from_millis(5),
			},
			ProbeOutcome {
				node: 1,
				health: Health::Healthy,
				elapsed: Duration::from_millis(80),
			},
			ProbeOutcome {
				node: 2,
				health: Health::Offline,
				elapsed: Duration::ZERO,
			},
			ProbeOutcome {
				node: 3,
				health: Health::Healthy,
				elapsed: Duration::from_millis(12),
			},
		];
		let view = bucket(&outcomes);
		let mut all: Vec<usize> = view
			.healthy
			.iter()
			.chain(&view.syncing)
			.chain(&view.offline)
			.copied()
			.collect();
		all.sort_unstable();
		assert_eq!(all, vec![0, 1, 2, 3]);
		assert_eq!(view.syncing, vec![0]);
		assert_eq!(view.offline, vec![2]);
	}

	#[test]
	fn healthy_is_sorted_fastest_first() {
		let outcomes = [
			ProbeOutcome {
				node: 0,
				health: Health::Healthy,
				elapsed: Duration::from_millis(90),
			},
			ProbeOutcome {
				node: 1,
				health: Health::Healthy,
				elapsed: Duration::from_millis(3),
			},
			ProbeOutcome {
				node: 2,
				health: Health::Healthy,
				elapsed: Duration::from_millis(40),
			},
		];
		assert_eq!(bucket(&outcomes).healthy, vec![1, 2, 0]);
	}
}
