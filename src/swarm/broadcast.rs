//! Transmit-limited broadcast queue.
//!
//! Queued payloads are rebroadcast a bounded number of times, scaled to
//! the size of the swarm the same way SWIM-style membership libraries
//! do it: `mult * ceil(log10(n + 1))` transmissions per payload.

use std::collections::VecDeque;
use std::sync::Mutex;

type NumNodes = Box<dyn Fn() -> usize + Send + Sync>;

/// Upper bound on queued broadcasts; the oldest are dropped on overflow.
const MAX_QUEUE_DEPTH: usize = 1024;

struct LimitedBroadcast {
	transmits: usize,
	payload: Vec<u8>,
}

pub struct TransmitLimitedQueue {
	retransmit_mult: usize,
	num_nodes: Mutex<Option<NumNodes>>,
	queue: Mutex<VecDeque<LimitedBroadcast>>,
}

impl TransmitLimitedQueue {
	pub fn new(retransmit_mult: usize) -> Self {
		Self {
			retransmit_mult: retransmit_mult.max(1),
			num_nodes: Mutex::new(None),
			queue: Mutex::new(VecDeque::new()),
		}
	}

	/// Bind the live member count. The queue is constructed before the
	/// membership handle exists, so the count arrives as a capability
	/// afterwards; until then a single-node swarm is assumed.
	pub fn bind_num_nodes(&self, f: impl Fn() -> usize + Send + Sync + 'static) {
		*self.num_nodes.lock().unwrap() = Some(Box::new(f));
	}

	pub fn queue_broadcast(&self, payload: Vec<u8>) {
		let mut queue = self.queue.lock().unwrap();
		if queue.len() >= MAX_QUEUE_DEPTH {
			queue.pop_front();
		}
		queue.push_back(LimitedBroadcast {
			transmits: 0,
			payload,
		});
	}

	/// Collect payloads for one gossip round within a byte budget of
	/// `limit`, charging `overhead` per payload. Each returned payload
	/// has its transmit count bumped; payloads that reach the
	/// retransmit limit are retired.
	pub fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
		let retransmit_limit = self.retransmit_limit();
		let mut queue = self.queue.lock().unwrap();
		let mut out = Vec::new();
		let mut used = 0;
		let mut index = 0;
		while index < queue.len() {
			let cost = overhead + queue[index].payload.len();
			if used + cost > limit {
				index += 1;
				continue;
			}
			used += cost;
			queue[index].transmits += 1;
			out.push(queue[index].payload.clone());
			if queue[index].transmits >= retransmit_limit {
				queue.remove(index);
			} else {
				index += 1;
			}
		}
		out
	}

	pub fn len(&self) -> usize {
		self.queue.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn retransmit_limit(&self) -> usize {
		let nodes = self
			.num_nodes
			.lock()
			.unwrap()
			.as_ref()
			.map(|f| f())
			.unwrap_or(1);
		let scale = ((nodes + 1) as f64).log10().ceil() as usize;
		(self.retransmit_mult * scale).max(1)
	}
}
