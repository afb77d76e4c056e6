//! The per-file indexing pipeline.
//!
//! One file in, one record out: stat, canonicalize, fingerprint, then
//! hand the record to the sink. Whether records also leave the host is
//! a property of the sink, not of the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::canonical::Canonicalizer;
use crate::fingerprint::{self, FingerprintError};
use crate::record::FileRecord;
use crate::store::writer::CacheWriter;
use crate::swarm::broadcast::TransmitLimitedQueue;

/// Where finished records go. The broadcast capability is injected here
/// so the pipeline carries no swarm state of its own.
pub enum RecordSink {
	LocalOnly(Arc<CacheWriter>),
	LocalAndBroadcast {
		writer: Arc<CacheWriter>,
		broadcasts: Arc<TransmitLimitedQueue>,
	},
}

impl RecordSink {
	async fn submit(&self, record: FileRecord) {
		match self {
			RecordSink::LocalOnly(writer) => writer.write(record).await,
			RecordSink::LocalAndBroadcast { writer, broadcasts } => {
				match serde_json::to_vec(&record) {
					Ok(payload) => broadcasts.queue_broadcast(payload),
					Err(err) => warn!("record broadcast encoding failed: {err}"),
				}
				writer.write(record).await;
			}
		}
	}
}

#[derive(Debug, Error)]
pub enum ProcessError {
	#[error("stat {}: {source}", .path.display())]
	Stat {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("resolve {}: {source}", .path.display())]
	Absolutize {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error(transparent)]
	Fingerprint(#[from] FingerprintError),
	#[error("cancelled")]
	Cancelled,
}

pub struct FileProcessor {
	host_id: String,
	canonicalizer: Canonicalizer,
	sink: RecordSink,
	cancel: CancellationToken,
}

impl FileProcessor {
	pub fn new(host_id: String, sink: RecordSink, cancel: CancellationToken) -> Self {
		Self {
			host_id,
			canonicalizer: Canonicalizer::new(),
			sink,
			cancel,
		}
	}

	/// Fingerprint one file and hand the finished record to the sink.
	/// Directories are silently ignored. Returns the digest.
	pub async fn process_file(&self, path: &Path) -> Result<Option<String>, ProcessError> {
		if self.cancel.is_cancelled() {
			return Err(ProcessError::Cancelled);
		}

		let meta = tokio::fs::metadata(path)
			.await
			.map_err(|source| ProcessError::Stat {
				path: path.to_path_buf(),
				source,
			})?;
		if meta.is_dir() {
			return Ok(None);
		}

		let abs = std::path::absolute(path).map_err(|source| ProcessError::Absolutize {
			path: path.to_path_buf(),
			source,
		})?;
		let canonical = self.canonicalizer.canonicalize(&abs.to_string_lossy());

		let digest = fingerprint::fingerprint_file(path).await?;

		let mod_time = meta
			.modified()
			.map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true))
			.map_err(|source| ProcessError::Stat {
				path: path.to_path_buf(),
				source,
			})?;

		let record = FileRecord::new(
			self.host_id.clone(),
			canonical,
			meta.len() as i64,
			mod_time,
			digest.clone(),
		);
		debug!(path = %record.file_path, id = %record.id, "indexed file");
		self.sink.submit(record).await;

		Ok(Some(digest))
	}
}
