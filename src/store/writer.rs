//! Asynchronous coalescing write cache in front of the store.
//!
//! Producers hand records to a bounded queue; a dedicated worker drains
//! it into an in-memory batch and flushes whenever the batch fills, the
//! flush interval elapses with work queued, an explicit flush arrives,
//! or the writer shuts down. No record is held unflushed across
//! shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::MetadataStore;
use crate::record::FileRecord;

enum Control {
	Flush,
	Shutdown,
}

pub struct CacheWriter {
	tx: flume::Sender<FileRecord>,
	control_tx: flume::Sender<Control>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWriter {
	/// Spawn the writer worker. The submission queue holds up to
	/// `2 * batch_size` records before producers are backpressured.
	pub fn new(store: Arc<MetadataStore>, batch_size: usize, flush_interval: Duration) -> Self {
		let batch_size = batch_size.max(1);
		let (tx, rx) = flume::bounded(batch_size * 2);
		let (control_tx, control_rx) = flume::unbounded();
		let worker = tokio::spawn(run_worker(store, rx, control_rx, batch_size, flush_interval));
		Self {
			tx,
			control_tx,
			worker: Mutex::new(Some(worker)),
		}
	}

	/// Queue a record for an eventual batched write.
	pub async fn write(&self, record: FileRecord) {
		if self.tx.send_async(record).await.is_err() {
			warn!("write cache worker is gone; record dropped");
		}
	}

	/// Ask the worker to flush whatever it has batched right now.
	pub fn flush_now(&self) {
		let _ = self.control_tx.send(Control::Flush);
	}

	/// Drain everything still queued, flush it, and stop the worker.
	/// Records submitted after `close` are dropped.
	pub async fn close(&self) {
		let _ = self.control_tx.send(Control::Shutdown);
		let worker = self.worker.lock().unwrap().take();
		if let Some(worker) = worker {
			if let Err(err) = worker.await {
				warn!("write cache worker panicked: {err}");
			}
		}
	}
}

async fn run_worker(
	store: Arc<MetadataStore>,
	rx: flume::Receiver<FileRecord>,
	control_rx: flume::Receiver<Control>,
	batch_size: usize,
	flush_interval: Duration,
) {
	let mut batch: Vec<FileRecord> = Vec::with_capacity(batch_size);
	let mut deadline = Box::pin(sleep_until(Instant::now() + flush_interval));

	loop {
		tokio::select! {
			record = rx.recv_async() => match record {
				Ok(record) => {
					batch.push(record);
					if batch.len() >= batch_size {
						flush(&store, &mut batch);
						deadline.as_mut().reset(Instant::now() + flush_interval);
					}
				}
				// Every producer hung up; fall through to the final drain.
				Err(_) => break,
			},
			_ = deadline.as_mut() => {
				if !batch.is_empty() {
					flush(&store, &mut batch);
				}
				deadline.as_mut().reset(Instant::now() + flush_interval);
			}
			control = control_rx.recv_async() => match control {
				Ok(Control::Flush) => {
					if !batch.is_empty() {
						flush(&store, &mut batch);
						deadline.as_mut().reset(Instant::now() + flush_interval);
					}
				}
				Ok(Control::Shutdown) | Err(_) => break,
			},
		}
	}

	// Final drain: whatever is still queued gets one last write.
	while let Ok(record) = rx.try_recv() {
		batch.push(record);
	}
	if !batch.is_empty() {
		flush(&store, &mut batch);
	}
}

fn flush(store: &MetadataStore, batch: &mut Vec<FileRecord>) {
	debug!(records = batch.len(), "flushing batch");
	if let Err(err) = store.put_batch(batch) {
		// Drop-on-fail: a wedged store must not stall the scan.
		warn!(records = batch.len(), "batch write failed, dropping batch: {err}");
	}
	batch.clear();
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FileRecord;

	fn record(path: &str) -> FileRecord {
		FileRecord::new(
			"host-w".into(),
			path.into(),
			8,
			"2024-06-01T12:00:00Z".into(),
			"cc".repeat(32),
		)
	}

	fn open_temp() -> (tempfile::TempDir, Arc<MetadataStore>) {
		let dir = tempfile::tempdir().unwrap();
		let store = MetadataStore::open(&dir.path().join("writer.db")).unwrap();
		(dir, Arc::new(store))
	}

	async fn wait_for_count(store: &MetadataStore, count: usize) {
		for _ in 0..100 {
			if store.get_all().unwrap().len() == count {
				return;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		panic!("store never reached {count} records");
	}

	#[tokio::test]
	async fn full_batch_triggers_flush() {
		let (_dir, store) = open_temp();
		let writer = CacheWriter::new(store.clone(), 2, Duration::from_secs(60));
		writer.write(record("/a")).await;
		writer.write(record("/b")).await;
		wait_for_count(&store, 2).await;
		writer.close().await;
	}

	#[tokio::test]
	async fn interval_triggers_flush() {
		let (_dir, store) = open_temp();
		let writer = CacheWriter::new(store.clone(), 100, Duration::from_millis(50));
		writer.write(record("/a")).await;
		wait_for_count(&store, 1).await;
		writer.close().await;
	}

	#[tokio::test]
	async fn explicit_flush_triggers_flush() {
		let (_dir, store) = open_temp();
		let writer = CacheWriter::new(store.clone(), 100, Duration::from_secs(60));
		writer.write(record("/a")).await;
		// The worker may not have drained the queue yet; nudge until it has.
		for _ in 0..10 {
			writer.flush_now();
			tokio::time::sleep(Duration::from_millis(20)).await;
			if store.get_all().unwrap().len() == 1 {
				break;
			}
		}
		assert_eq!(store.get_all().unwrap().len(), 1);
		writer.close().await;
	}

	#[tokio::test]
	async fn close_drains_everything() {
		let (_dir, store) = open_temp();
		let writer = CacheWriter::new(store.clone(), 100, Duration::from_secs(60));
		for i in 0..10 {
			writer.write(record(&format!("/f{i}"))).await;
		}
		writer.close().await;
		assert_eq!(store.get_all().unwrap().len(), 10);
	}
}
