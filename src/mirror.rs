use crate::node::Node;
use bytes::Bytes;
use http::HeaderMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, trace};

/// Fire-and-forget executor for mirrored requests. Nothing awaits, collects
/// or retries the work submitted here; the point is that the primary path
/// stays unblocked. Responses are discarded and transport failures are
/// absorbed by the node's own relabeling.
#[derive(Clone)]
pub struct MirrorPool {
	permits: Arc<Semaphore>,
}

impl MirrorPool {
	/// `width` bounds how many mirrored requests are in flight at once;
	/// callers size it to hardware concurrency.
	pub fn new(width: usize) -> Self {
		let width = width.max(1);
		info!("mirror pool bounded to {} concurrent requests", width);
		Self {
			permits: Arc::new(Semaphore::new(width)),
		}
	}

	pub fn submit(&self, node: Arc<Node>, body: Bytes, headers: HeaderMap) {
		let permits = self.permits.clone();
		tokio::spawn(async move {
			let Ok(_permit) = permits.acquire_owned().await else {
				return;
			};
			trace!("mirroring request to {}", node.url);
			let _ = node.post(body, headers).await;
		});
	}
}
