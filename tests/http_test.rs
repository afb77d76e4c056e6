//! The replication HTTP surface: bulk export and peer registration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use swarmdex::record::FileRecord;
use swarmdex::server::{self, PeerRegistry};
use swarmdex::store::MetadataStore;

fn record(path: &str) -> FileRecord {
	FileRecord::new(
		"host-http".into(),
		path.into(),
		7,
		"2024-06-01T12:00:00Z".into(),
		"ee".repeat(32),
	)
}

async fn spawn_server(store: Arc<MetadataStore>) -> (String, CancellationToken) {
	let registry = Arc::new(PeerRegistry::default());
	let router = server::router(store, registry, 7946);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let base = format!("http://{}", listener.local_addr().unwrap());
	let cancel = CancellationToken::new();
	let token = cancel.clone();
	tokio::spawn(async move {
		server::serve(listener, router, token).await.unwrap();
	});
	(base, cancel)
}

#[tokio::test]
async fn changes_returns_every_stored_record() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MetadataStore::open(&dir.path().join("http.db")).unwrap());
	let r1 = record("/one");
	let r2 = record("/two");
	store.put(&r1).unwrap();
	store.put(&r2).unwrap();

	let (base, cancel) = spawn_server(store).await;
	let mut records: Vec<FileRecord> = reqwest::get(format!("{base}/_changes"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	records.sort_by(|a, b| a.file_path.cmp(&b.file_path));

	let mut expected = vec![r1, r2];
	expected.sort_by(|a, b| a.file_path.cmp(&b.file_path));
	assert_eq!(records, expected);
	cancel.cancel();
}

#[tokio::test]
async fn peerlist_registers_and_deduplicates_callers() {
	let dir = tempfile::tempdir().unwrap();
	let store = Arc::new(MetadataStore::open(&dir.path().join("http.db")).unwrap());
	let (base, cancel) = spawn_server(store).await;

	let first: Vec<String> = reqwest::get(format!("{base}/peerlist"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(first, vec!["127.0.0.1:7946".to_string()]);

	let second: Vec<String> = reqwest::get(format!("{base}/peerlist"))
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(second, vec!["127.0.0.1:7946".to_string()]);
	cancel.cancel();
}
