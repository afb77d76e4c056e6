//! Membership callbacks binding the swarm to the local store.

use std::sync::Arc;

use tracing::{debug, warn};

use super::broadcast::TransmitLimitedQueue;
use crate::record::FileRecord;
use crate::store::MetadataStore;

/// The callback contract the membership layer drives. Mirrors the
/// delegate shape of SWIM-style membership libraries: incremental
/// messages flow through `notify_msg`/`get_broadcasts`, bulk
/// anti-entropy through `local_state`/`merge_remote_state`.
pub trait Delegate: Send + Sync + 'static {
	/// Per-node metadata included in membership messages.
	fn node_meta(&self, limit: usize) -> Vec<u8>;
	/// Handle one incremental user message.
	fn notify_msg(&self, msg: &[u8]);
	/// Collect pending broadcasts within a byte budget.
	fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>>;
	/// Snapshot of the full local state for anti-entropy exchange.
	fn local_state(&self, join: bool) -> Vec<u8>;
	/// Merge a remote node's full state into local state.
	fn merge_remote_state(&self, buf: &[u8], join: bool);
}

/// Store-backed delegate: incremental messages and merged state land in
/// the metadata store; the full index is served back out as JSON.
pub struct IndexDelegate {
	store: Arc<MetadataStore>,
	broadcasts: Arc<TransmitLimitedQueue>,
}

impl IndexDelegate {
	pub fn new(store: Arc<MetadataStore>, broadcasts: Arc<TransmitLimitedQueue>) -> Self {
		Self { store, broadcasts }
	}
}

impl Delegate for IndexDelegate {
	fn node_meta(&self, _limit: usize) -> Vec<u8> {
		Vec::new()
	}

	fn notify_msg(&self, msg: &[u8]) {
		let record: FileRecord = match serde_json::from_slice(msg) {
			Ok(record) => record,
			Err(err) => {
				warn!("discarding undecodable gossip payload: {err}");
				return;
			}
		};
		debug!(path = %record.file_path, "received replicated record");
		if let Err(err) = self.store.put(&record) {
			warn!(path = %record.file_path, "failed to store replicated record: {err}");
		}
	}

	fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
		self.broadcasts.get_broadcasts(overhead, limit)
	}

	fn local_state(&self, _join: bool) -> Vec<u8> {
		let records = match self.store.get_all() {
			Ok(records) => records,
			Err(err) => {
				warn!("local state snapshot failed: {err}");
				return Vec::new();
			}
		};
		serde_json::to_vec(&records).unwrap_or_else(|err| {
			warn!("local state encoding failed: {err}");
			Vec::new()
		})
	}

	fn merge_remote_state(&self, buf: &[u8], join: bool) {
		if buf.is_empty() {
			return;
		}
		let records: Vec<FileRecord> = match serde_json::from_slice(buf) {
			Ok(records) => records,
			Err(err) => {
				warn!("discarding undecodable remote state: {err}");
				return;
			}
		};
		debug!(records = records.len(), join, "merging remote state");
		for record in records {
			if let Err(err) = self.store.put(&record) {
				warn!(id = %record.id, "failed to merge record: {err}");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn delegate() -> (tempfile::TempDir, IndexDelegate, Arc<MetadataStore>) {
		let dir = tempfile::tempdir().unwrap();
		let store = Arc::new(MetadataStore::open(&dir.path().join("d.db")).unwrap());
		let queue = Arc::new(TransmitLimitedQueue::new(3));
		(dir, IndexDelegate::new(store.clone(), queue), store)
	}

	fn record(path: &str) -> FileRecord {
		FileRecord::new(
			"host-d".into(),
			path.into(),
			1,
			"2024-06-01T12:00:00Z".into(),
			"dd".repeat(32),
		)
	}

	#[test]
	fn notify_msg_stores_the_record() {
		let (_dir, delegate, store) = delegate();
		let rec = record("/a");
		delegate.notify_msg(&serde_json::to_vec(&rec).unwrap());
		assert_eq!(store.get_all().unwrap(), vec![rec]);
	}

	#[test]
	fn notify_msg_discards_garbage() {
		let (_dir, delegate, store) = delegate();
		delegate.notify_msg(b"not json at all");
		assert!(store.get_all().unwrap().is_empty());
	}

	#[test]
	fn state_round_trips_between_delegates() {
		let (_dir_a, a, store_a) = delegate();
		let (_dir_b, b, store_b) = delegate();
		store_a.put(&record("/a1")).unwrap();
		store_a.put(&record("/a2")).unwrap();
		store_b.put(&record("/b1")).unwrap();

		b.merge_remote_state(&a.local_state(true), true);
		a.merge_remote_state(&b.local_state(true), true);

		let ids = |store: &MetadataStore| {
			let mut ids: Vec<String> =
				store.get_all().unwrap().into_iter().map(|r| r.id).collect();
			ids.sort();
			ids
		};
		assert_eq!(ids(&store_a), ids(&store_b));
		assert_eq!(ids(&store_a).len(), 3);
	}

	#[test]
	fn node_meta_is_empty() {
		let (_dir, delegate, _store) = delegate();
		assert!(delegate.node_meta(128).is_empty());
	}
}
