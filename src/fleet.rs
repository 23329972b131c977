use crate::node::Node;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Ordered snapshot of the fleet, rebuilt from scratch by every probe
/// cycle. Entries are indices into [`Fleet::nodes`]; `healthy` is sorted
/// fastest-first and is the routing preference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FleetView {
	pub healthy: Vec<usize>,
	pub syncing: Vec<usize>,
	pub offline: Vec<usize>,
}

/// The configured backends plus the atomically swappable view over them.
/// Dispatchers load one snapshot per request; the prober replaces the view
/// wholesale at the end of a cycle, so the hot path never takes a lock.
pub struct Fleet {
	nodes: Vec<Arc<Node>>,
	view: ArcSwap<FleetView>,
}

impl Fleet {
	pub fn new(urls: Vec<String>, client: reqwest::Client) -> Self {
		let nodes: Vec<Arc<Node>> = urls
			.into_iter()
			.map(|url| Arc::new(Node::new(url, client.clone())))
			.collect();
		// nothing has been probed yet, so everything starts offline
		let view = FleetView {
			offline: (0..nodes.len()).collect(),
			..FleetView::default()
		};
		Self {
			nodes,
			view: ArcSwap::from_pointee(view),
		}
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, idx: usize) -> Arc<Node> {
		self.nodes[idx].clone()
	}

	pub fn nodes(&self) -> &[Arc<Node>] {
		&self.nodes
	}

	pub fn view(&self) -> Arc<FleetView> {
		self.view.load_full()
	}

	pub fn publish(&self, view: FleetView) {
		self.view.store(Arc::new(view));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_with_every_node_offline() {
		let fleet = Fleet::new(
			vec![
				"http://127.0.0.1:1".to_string(),
				"http://127.0.0.1:2".to_string(),
			],
			reqwest::Client::new(),
		);
		let view = fleet.view();
		assert!(view.healthy.is_empty());
		assert!(view.syncing.is_empty());
		assert_eq!(view.offline, vec![0, 1]);
	}

	#[test]
	fn readers_keep_their_snapshot_across_a_publish() {
		let fleet = Fleet::new(vec!["http://127.0.0.1:1".to_string()], reqwest::Client::new());
		let before = fleet.view();
		fleet.publish(FleetView {
			healthy: vec![0],
			..FleetView::default()
		});
		assert_eq!(before.offline, vec![0]);
		assert_eq!(fleet.view().healthy, vec![0]);
	}
}
