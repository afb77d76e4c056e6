//! Embedded persistent store for metadata records.
//!
//! A single redb database with one `metadata` table, keyed by record id
//! with JSON-encoded values. Readers run against an MVCC snapshot and
//! never block the writer. Opening the same path twice from one process
//! is not supported.

pub mod writer;

use std::path::Path;
use std::time::{Duration, Instant};

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::FileRecord;

const METADATA_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("metadata");

/// How long to keep retrying the database file lock before giving up.
const OPEN_TIMEOUT: Duration = Duration::from_secs(1);
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("create database directory {dir}: {source}")]
	CreateDir {
		dir: String,
		source: std::io::Error,
	},
	#[error("open database: {0}")]
	Open(#[from] redb::DatabaseError),
	#[error("transaction: {0}")]
	Transaction(#[from] redb::TransactionError),
	#[error("table: {0}")]
	Table(#[from] redb::TableError),
	#[error("storage: {0}")]
	Storage(#[from] redb::StorageError),
	#[error("commit: {0}")]
	Commit(#[from] redb::CommitError),
	#[error("encode record {id}: {source}")]
	Encode {
		id: String,
		source: serde_json::Error,
	},
}

pub struct MetadataStore {
	db: Database,
}

impl MetadataStore {
	/// Open (or create) the database at `path`, creating the containing
	/// directory and retrying the file lock within a bounded window.
	pub fn open(path: &Path) -> Result<Self, StoreError> {
		if let Some(dir) = path.parent() {
			std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
				dir: dir.display().to_string(),
				source,
			})?;
		}

		let deadline = Instant::now() + OPEN_TIMEOUT;
		let db = loop {
			match Database::create(path) {
				Ok(db) => break db,
				Err(err) if Instant::now() < deadline => {
					debug!("database not yet available, retrying: {err}");
					std::thread::sleep(OPEN_RETRY_DELAY);
				}
				Err(err) => return Err(err.into()),
			}
		};

		let txn = db.begin_write()?;
		{
			txn.open_table(METADATA_TABLE)?;
		}
		txn.commit()?;

		Ok(Self { db })
	}

	/// Write a single record. Later writes to the same id overwrite
	/// earlier ones.
	pub fn put(&self, record: &FileRecord) -> Result<(), StoreError> {
		self.put_batch(std::slice::from_ref(record))
	}

	/// Write a batch of records in one transaction: either every record
	/// becomes visible or none does.
	pub fn put_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
		if records.is_empty() {
			return Ok(());
		}
		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(METADATA_TABLE)?;
			for record in records {
				let data = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
					id: record.id.clone(),
					source,
				})?;
				table.insert(record.id.as_str(), data)?;
			}
		}
		txn.commit()?;
		Ok(())
	}

	/// Snapshot scan of every stored record, in unspecified order.
	/// Rows that no longer decode are logged and skipped.
	pub fn get_all(&self) -> Result<Vec<FileRecord>, StoreError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(METADATA_TABLE)?;
		let mut records = Vec::new();
		for entry in table.iter()? {
			let (key, value) = entry?;
			match serde_json::from_slice::<FileRecord>(&value.value()) {
				Ok(record) => records.push(record),
				Err(err) => warn!(id = key.value(), "skipping undecodable record: {err}"),
			}
		}
		Ok(records)
	}

	/// Release the underlying file lock.
	pub fn close(self) {}
}
