use crate::fcu;
use crate::fleet::{Fleet, FleetView};
use crate::health::HealthProber;
use crate::mirror::MirrorPool;
use crate::node::{Health, Node, RpcResponse};
use bytes::Bytes;
use http::HeaderMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, trace};

/// One inbound JSON-RPC call, parsed once by the frontend and immutable
/// afterwards.
#[derive(Clone, Debug)]
pub struct InboundRequest {
	pub body: Bytes,
	pub headers: HeaderMap,
	pub method: String,
	pub json: serde_json::Value,
}

/// Holds the fleet and picks a dispatch strategy per JSON-RPC method:
/// single primary for block proposal, full fan-out with reconciliation for
/// forkchoiceUpdated, primary-with-mirroring for everything else.
pub struct Router {
	fleet: Arc<Fleet>,
	prober: HealthProber,
	mirror: MirrorPool,
	fcu_invalid_threshold: f64,
	primary: AtomicUsize,
}

impl Router {
	pub fn new(
		fleet: Arc<Fleet>,
		prober: HealthProber,
		mirror: MirrorPool,
		fcu_invalid_threshold: f64,
	) -> Self {
		info!("initialized with {} nodes", fleet.len());
		Self {
			fleet,
			prober,
			mirror,
			fcu_invalid_threshold,
			primary: AtomicUsize::new(0),
		}
	}

	/// The sticky primary: the same node keeps being returned for as long
	/// as it stays healthy, so that paired calls (forkchoiceUpdated then
	/// getPayload) land on the node that owns the payload id.
	pub async fn get_execution_node(&self) -> Arc<Node> {
		let (_, _, node) = self.pick_primary().await;
		node
	}

	async fn pick_primary(&self) -> (Arc<FleetView>, usize, Arc<Node>) {
		loop {
			let view = self.healthy_view().await;
			let len = view.healthy.len();
			// the cursor survives probe cycles, so clamp it lazily
			let mut pos = self.primary.load(Ordering::Relaxed) % len;
			for _ in 0..len {
				let node = self.fleet.node(view.healthy[pos]);
				if node.health() == Health::Healthy {
					self.primary.store(pos, Ordering::Relaxed);
					return (view, pos, node);
				}
				pos = (pos + 1) % len;
			}
			// every listed node went stale since the last probe
			self.prober.run_cycle().await;
		}
	}

	/// A fleet view with at least one healthy node, probing on demand until
	/// one appears.
	async fn healthy_view(&self) -> Arc<FleetView> {
		loop {
			let view = self.fleet.view();
			if !view.healthy.is_empty() {
				return view;
			}
			self.prober.run_cycle().await;
		}
	}

	pub async fn route(&self, req: InboundRequest) -> RpcResponse {
		trace!("dispatching {}", req.json);
		match req.method.as_str() {
			// block proposal is pinned to one node: payload ids are
			// per-node, and a fan-out could only disagree wastefully
			"engine_getPayloadV1" => {
				let node = self.get_execution_node().await;
				debug!("getPayload request sent to {}", node.url);
				node.post(req.body, req.headers).await
			},
			"engine_forkchoiceUpdatedV1" => self.route_forkchoice(req).await,
			_ => self.route_mirrored(req).await,
		}
	}

	/// Fan out to every healthy node, wait for all of them, and reconcile
	/// the bag into one safe answer. Syncing nodes are not asked (their
	/// answers are known-stale) but get the head pushed to them afterwards.
	async fn route_forkchoice(&self, req: InboundRequest) -> RpcResponse {
		let view = self.healthy_view().await;
		debug!(
			"forkchoiceUpdated request sent to {} nodes",
			view.healthy.len()
		);
		let calls = view.healthy.iter().map(|&idx| {
			let node = self.fleet.node(idx);
			let body = req.body.clone();
			let headers = req.headers.clone();
			async move { node.post(body, headers).await }
		});
		let resps = futures::future::join_all(calls).await;

		let fcu::Reconciled {
			response,
			rebroadcast,
		} = fcu::reconcile(&resps, self.fcu_invalid_threshold);
		if rebroadcast {
			for &idx in &view.syncing {
				self
					.mirror
					.submit(self.fleet.node(idx), response.body.clone(), response.headers.clone());
			}
		}
		response
	}

	/// Answer from the primary, mirror to everyone else. Mirroring keeps
	/// syncing nodes fed with the blocks the consensus client is streaming
	/// and keeps idle healthy nodes consistent; nothing waits on it.
	async fn route_mirrored(&self, req: InboundRequest) -> RpcResponse {
		let (view, pos, node) = self.pick_primary().await;
		trace!("routing {} to {}", req.method, node.url);
		for (i, &idx) in view.healthy.iter().enumerate() {
			if i != pos {
				self
					.mirror
					.submit(self.fleet.node(idx), req.body.clone(), req.headers.clone());
			}
		}
		for &idx in &view.syncing {
			self
				.mirror
				.submit(self.fleet.node(idx), req.body.clone(), req.headers.clone());
		}
		node.post(req.body, req.headers).await
	}
}
