use crate::node::RpcResponse;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use std::collections::BTreeMap;

/// Body returned whenever the fleet cannot be trusted to agree. SYNCING
/// stalls the consensus client, which will re-ask instead of attesting.
pub const FORGED_SYNCING_BODY: &str = "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"payloadStatus\":{\"status\":\"SYNCING\",\"latestValidHash\":null,\"validationError\":null},\"payloadId\":null}}";

/// Outcome of reconciling a forkchoiceUpdated fan-out. `rebroadcast` is set
/// only on the all-VALID fall-through, the one case where the first body is
/// safe to push to syncing nodes.
#[derive(Clone, Debug)]
pub struct Reconciled {
	pub response: RpcResponse,
	pub rebroadcast: bool,
}

/// Collapse a bag of backend replies into the single answer the consensus
/// client may act on.
///
/// INVALID needs a super-majority: rejecting the head on thin evidence
/// forks the validator for nothing. VALID needs unanimity: attesting to a
/// block any backend rejected is the one unrecoverable mistake. Everything
/// in between is answered with a forged SYNCING, which merely stalls.
pub fn reconcile(resps: &[RpcResponse], invalid_threshold: f64) -> Reconciled {
	let Some(majority) = majority_body(resps, invalid_threshold) else {
		return forged_syncing();
	};

	match payload_status(majority) {
		Some(status) if status == "INVALID" => {
			return Reconciled {
				response: synthesized(majority.clone()),
				rebroadcast: false,
			};
		},
		Some(_) => {},
		// a majority body we cannot even parse is no majority at all
		None => return forged_syncing(),
	}

	for resp in resps {
		match payload_status(&resp.body) {
			// a lone INVALID is not enough evidence to reject the block,
			// but it is more than enough to withhold VALID
			Some(status) if status == "INVALID" || status == "SYNCING" => {
				return forged_syncing();
			},
			Some(_) => {},
			// an unreadable reply counts as a SYNCING vote
			None => return forged_syncing(),
		}
	}

	Reconciled {
		response: resps[0].clone(),
		rebroadcast: true,
	}
}

/// The body occurring strictly more often than `threshold * n`, if any.
/// Strict comparison means ties never reach a majority. Counting into a
/// BTreeMap keeps the scan independent of response order.
fn majority_body(resps: &[RpcResponse], threshold: f64) -> Option<&Bytes> {
	let mut counts: BTreeMap<&Bytes, usize> = BTreeMap::new();
	for resp in resps {
		*counts.entry(&resp.body).or_default() += 1;
	}
	let mut best: Option<(&Bytes, usize)> = None;
	for (body, count) in counts {
		if best.is_none_or(|(_, top)| count > top) {
			best = Some((body, count));
		}
	}
	let (body, count) = best?;
	(count as f64 > threshold * resps.len() as f64).then_some(body)
}

fn payload_status(body: &[u8]) -> Option<String> {
	let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
	parsed["result"]["payloadStatus"]["status"]
		.as_str()
		.map(str::to_owned)
}

/// The forged body is not any backend's body, so its headers cannot be any
/// backend's headers either; length and type are synthesized to match.
fn synthesized(body: Bytes) -> RpcResponse {
	let mut headers = HeaderMap::new();
	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
	RpcResponse {
		status: 200,
		body,
		headers,
	}
}

fn forged_syncing() -> Reconciled {
	Reconciled {
		response: synthesized(Bytes::from_static(FORGED_SYNCING_BODY.as_bytes())),
		rebroadcast: false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fcu_body(status: &str, hash: &str) -> String {
		format!(
			r#"{{"jsonrpc":"2.0","id":1,"result":{{"payloadStatus":{{"status":"{status}","latestValidHash":"{hash}","validationError":null}},"payloadId":null}}}}"#
		)
	}

	fn resp(body: &str) -> RpcResponse {
		let mut headers = HeaderMap::new();
		headers.insert("x-backend", HeaderValue::from_static("upstream"));
		RpcResponse {
			status: 200,
			body: Bytes::from(body.to_string()),
			headers,
		}
	}

	fn assert_forged(reconciled: &Reconciled) {
		assert!(!reconciled.rebroadcast);
		assert_eq!(reconciled.response.status, 200);
		assert_eq!(
			reconciled.response.body.as_ref(),
			FORGED_SYNCING_BODY.as_bytes()
		);
		assert_eq!(reconciled.response.headers[CONTENT_LENGTH.as_str()], "135");
		assert_eq!(
			reconciled.response.headers[CONTENT_TYPE.as_str()],
			"application/json"
		);
	}

	#[test]
	fn forged_body_is_exactly_135_bytes() {
		assert_eq!(FORGED_SYNCING_BODY.len(), 135);
	}

	#[test]
	fn all_valid_returns_first_verbatim() {
		let valid = fcu_body("VALID", "0xaa");
		let resps = vec![resp(&valid), resp(&valid), resp(&valid)];
		let reconciled = reconcile(&resps, 0.6);
		assert!(reconciled.rebroadcast);
		assert_eq!(reconciled.response.body.as_ref(), valid.as_bytes());
		// verbatim means the backend's own headers survive
		assert_eq!(reconciled.response.headers["x-backend"], "upstream");
	}

	#[test]
	fn majority_invalid_is_returned_verbatim() {
		let invalid = fcu_body("INVALID", "0xbb");
		let valid = fcu_body("VALID", "0xaa");
		// 2 identical > 0.6 * 3 = 1.8
		let resps = vec![resp(&invalid), resp(&invalid), resp(&valid)];
		let reconciled = reconcile(&resps, 0.6);
		assert!(!reconciled.rebroadcast);
		assert_eq!(reconciled.response.body.as_ref(), invalid.as_bytes());
		assert_eq!(
			reconciled.response.headers[CONTENT_LENGTH.as_str()],
			invalid.len().to_string().as_str()
		);
	}

	#[test]
	fn lone_invalid_without_majority_forges_syncing() {
		// three distinct bodies, nothing exceeds the threshold
		let resps = vec![
			resp(&fcu_body("INVALID", "0xbb")),
			resp(&fcu_body("VALID", "0xaa")),
			resp(&fcu_body("VALID", "0xcc")),
		];
		assert_forged(&reconcile(&resps, 0.6));
	}

	#[test]
	fn stray_syncing_blocks_a_valid_majority() {
		let valid = fcu_body("VALID", "0xaa");
		// the VALID body is the majority, but the stray SYNCING vote means
		// not every node has actually validated the head
		let resps = vec![
			resp(&valid),
			resp(&valid),
			resp(&fcu_body("SYNCING", "0xaa")),
		];
		assert_forged(&reconcile(&resps, 0.6));
	}

	#[test]
	fn single_invalid_vote_is_below_threshold() {
		let invalid = fcu_body("INVALID", "0xbb");
		let valid = fcu_body("VALID", "0xaa");
		// 1 is not > 1.8, so no majority; the INVALID vote still blocks VALID
		let resps = vec![resp(&invalid), resp(&valid), resp(&valid)];
		let reconciled = reconcile(&resps, 0.6);
		assert_ne!(reconciled.response.body.as_ref(), invalid.as_bytes());
		assert_forged(&reconciled);
	}

	#[test]
	fn threshold_of_one_requires_unanimity() {
		let invalid = fcu_body("INVALID", "0xbb");
		// 2 > 1.0 * 2 is false: ties and full sets never clear T = 1.0
		let resps = vec![resp(&invalid), resp(&invalid)];
		assert_forged(&reconcile(&resps, 1.0));

		let reconciled = reconcile(&resps[..1], 0.99);
		assert_eq!(reconciled.response.body.as_ref(), invalid.as_bytes());
	}

	#[test]
	fn majority_check_is_order_independent() {
		let invalid = fcu_body("INVALID", "0xbb");
		let valid = fcu_body("VALID", "0xaa");
		let orders = [
			vec![resp(&invalid), resp(&invalid), resp(&valid)],
			vec![resp(&invalid), resp(&valid), resp(&invalid)],
			vec![resp(&valid), resp(&invalid), resp(&invalid)],
		];
		for resps in &orders {
			assert_eq!(
				reconcile(resps, 0.6).response.body.as_ref(),
				invalid.as_bytes()
			);
		}
	}

	#[test]
	fn unparseable_majority_forges_syncing() {
		let resps = vec![resp("garbage"), resp("garbage"), resp("garbage")];
		assert_forged(&reconcile(&resps, 0.6));
	}

	#[test]
	fn unanimous_syncing_forges_syncing() {
		let syncing = fcu_body("SYNCING", "0xaa");
		let resps = vec![resp(&syncing), resp(&syncing), resp(&syncing)];
		assert_forged(&reconcile(&resps, 0.6));
	}

	#[test]
	fn transport_failures_count_as_syncing_votes() {
		let valid = fcu_body("VALID", "0xaa");
		let resps = vec![
			resp(&valid),
			resp(&valid),
			resp(&valid),
			RpcResponse::transport_error(),
		];
		// the empty body is unreadable, so the VALID majority is withheld
		assert_forged(&reconcile(&resps, 0.6));
	}
}
