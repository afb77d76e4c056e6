//! End-to-end indexing pipeline: walk, fingerprint, persist.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use swarmdex::processor::{FileProcessor, RecordSink};
use swarmdex::store::writer::CacheWriter;
use swarmdex::store::MetadataStore;
use swarmdex::walker::{ScanError, ScanEvent, Walker};

struct Pipeline {
	dir: tempfile::TempDir,
	store: Arc<MetadataStore>,
	writer: Arc<CacheWriter>,
	walker: Walker,
	events: flume::Receiver<ScanEvent>,
	cancel: CancellationToken,
}

fn pipeline() -> Pipeline {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MetadataStore::open(&dir.path().join("index.db")).unwrap());
	let writer = Arc::new(CacheWriter::new(
		store.clone(),
		8,
		Duration::from_millis(20),
	));
	let cancel = CancellationToken::new();
	let processor = Arc::new(FileProcessor::new(
		"test-host".into(),
		RecordSink::LocalOnly(writer.clone()),
		cancel.clone(),
	));
	let (events_tx, events) = flume::unbounded();
	let walker = Walker::new(processor, events_tx, cancel.clone(), 2);
	Pipeline {
		dir,
		store,
		writer,
		walker,
		events,
		cancel,
	}
}

#[tokio::test]
async fn scan_indexes_root_files_and_subdirectories() {
	let p = pipeline();
	let root = p.dir.path().join("tree");
	std::fs::create_dir(&root).unwrap();
	std::fs::write(root.join("top1.txt"), b"top one").unwrap();
	std::fs::write(root.join("top2.txt"), b"top two").unwrap();
	let sub = root.join("sub");
	std::fs::create_dir_all(sub.join("nested")).unwrap();
	std::fs::write(sub.join("inner.txt"), b"inner").unwrap();
	std::fs::write(sub.join("nested").join("deep.txt"), b"deep").unwrap();

	p.walker.scan(&root).await.unwrap();
	p.writer.close().await;

	let records = p.store.get_all().unwrap();
	assert_eq!(records.len(), 4);

	let deep = records
		.iter()
		.find(|r| r.file_path.ends_with("deep.txt"))
		.expect("deep.txt indexed");
	assert_eq!(deep.digest, blake3::hash(b"deep").to_hex().to_string());
	assert_eq!(deep.size, 4);
	assert_eq!(deep.host_id, "test-host");
	assert!(deep.file_path.starts_with('/'));

	// Every record id matches its identity string.
	for record in &records {
		assert_eq!(
			record.id,
			uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, record.id_string.as_bytes())
				.to_string(),
		);
	}
}

#[tokio::test]
async fn scan_emits_progress_events_per_subdirectory() {
	let p = pipeline();
	let root = p.dir.path().join("tree");
	let sub = root.join("docs");
	std::fs::create_dir_all(&sub).unwrap();
	std::fs::write(sub.join("a.txt"), b"a").unwrap();
	std::fs::write(sub.join("b.txt"), b"b").unwrap();

	p.walker.scan(&root).await.unwrap();
	drop(p.walker);

	let events: Vec<ScanEvent> = p.events.drain().collect();
	assert!(events
		.iter()
		.any(|e| matches!(e, ScanEvent::RootStarted { .. })));
	assert!(events.iter().any(
		|e| matches!(e, ScanEvent::SubdirStarted { index: 1, total: 1, .. }),
	));
	let final_progress = events
		.iter()
		.filter_map(|e| match e {
			ScanEvent::Progress {
				files_processed,
				files_total,
				..
			} => Some((*files_processed, *files_total)),
			_ => None,
		})
		.max();
	assert_eq!(final_progress, Some((2, 2)));
	p.writer.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_entries_do_not_abort_the_scan() {
	let p = pipeline();
	let root = p.dir.path().join("tree");
	let sub = root.join("sub");
	std::fs::create_dir_all(&sub).unwrap();
	std::fs::write(sub.join("ok.txt"), b"fine").unwrap();
	// A dangling symlink stats as missing and must only skip itself.
	std::os::unix::fs::symlink("/nonexistent/target", sub.join("broken")).unwrap();

	p.walker.scan(&root).await.unwrap();
	p.writer.close().await;

	let records = p.store.get_all().unwrap();
	assert_eq!(records.len(), 1);
	assert!(records[0].file_path.ends_with("ok.txt"));

	let events: Vec<ScanEvent> = p.events.drain().collect();
	assert!(events
		.iter()
		.any(|e| matches!(e, ScanEvent::FileFailed { .. })));
}

#[tokio::test]
async fn cancellation_returns_promptly() {
	let p = pipeline();
	let root = p.dir.path().join("tree");
	let sub = root.join("bulk");
	std::fs::create_dir_all(&sub).unwrap();
	for i in 0..200 {
		std::fs::write(sub.join(format!("f{i}.bin")), vec![0u8; 128]).unwrap();
	}

	p.cancel.cancel();
	let result = p.walker.scan(&root).await;
	assert!(matches!(result, Err(ScanError::Cancelled)));
	p.writer.close().await;
}
