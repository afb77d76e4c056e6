//! Two-phase directory traversal with per-subdirectory progress.
//!
//! Phase A handles regular files sitting directly under the root.
//! Phase B takes each direct subdirectory in turn, collects every
//! non-directory entry beneath it, and processes the collection as one
//! unit while reporting progress. Individual entry failures are
//! reported and skipped; an unreadable subdirectory aborts only its own
//! subtree.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

use crate::processor::{FileProcessor, ProcessError};

#[derive(Debug, Clone)]
pub enum ScanEvent {
	RootStarted {
		root: PathBuf,
	},
	SubdirStarted {
		index: usize,
		total: usize,
		path: PathBuf,
	},
	Progress {
		subdir_index: usize,
		subdir_total: usize,
		files_processed: u64,
		files_total: u64,
	},
	FileFailed {
		path: PathBuf,
		error: String,
	},
	SubdirFailed {
		path: PathBuf,
		error: String,
	},
}

#[derive(Debug, Error)]
pub enum ScanError {
	#[error("read directory {}: {source}", .path.display())]
	ReadDir {
		path: PathBuf,
		source: io::Error,
	},
	#[error("scan cancelled")]
	Cancelled,
}

pub struct Walker {
	processor: Arc<FileProcessor>,
	events: flume::Sender<ScanEvent>,
	cancel: CancellationToken,
	workers: usize,
}

impl Walker {
	pub fn new(
		processor: Arc<FileProcessor>,
		events: flume::Sender<ScanEvent>,
		cancel: CancellationToken,
		workers: usize,
	) -> Self {
		Self {
			processor,
			events,
			cancel,
			workers: workers.max(1),
		}
	}

	pub async fn scan(&self, root: &Path) -> Result<(), ScanError> {
		self.check_cancel()?;
		let _ = self.events.send(ScanEvent::RootStarted {
			root: root.to_path_buf(),
		});

		let (root_files, subdirs) = list_root(root, self.cancel.clone()).await?;
		self.process_files(&root_files, None).await?;

		let total = subdirs.len();
		for (position, dir) in subdirs.iter().enumerate() {
			self.check_cancel()?;
			let index = position + 1;
			let _ = self.events.send(ScanEvent::SubdirStarted {
				index,
				total,
				path: dir.clone(),
			});

			let files = match collect_files(dir.clone(), self.events.clone(), self.cancel.clone())
				.await
			{
				Ok(files) => files,
				Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
				Err(err) => {
					let _ = self.events.send(ScanEvent::SubdirFailed {
						path: dir.clone(),
						error: err.to_string(),
					});
					continue;
				}
			};
			if files.is_empty() {
				continue;
			}
			self.process_files(&files, Some((index, total))).await?;
		}
		Ok(())
	}

	async fn process_files(
		&self,
		files: &[PathBuf],
		subdir: Option<(usize, usize)>,
	) -> Result<(), ScanError> {
		let files_total = files.len() as u64;
		let processed = AtomicU64::new(0);

		stream::iter(files)
			.for_each_concurrent(self.workers, |path| {
				let processed = &processed;
				async move {
					// In-flight work finishes; nothing new starts.
					if self.cancel.is_cancelled() {
						return;
					}
					if let Err(err) = self.processor.process_file(path).await {
						if !matches!(err, ProcessError::Cancelled) {
							let _ = self.events.send(ScanEvent::FileFailed {
								path: path.clone(),
								error: err.to_string(),
							});
						}
					}
					let files_processed = processed.fetch_add(1, Ordering::Relaxed) + 1;
					if let Some((subdir_index, subdir_total)) = subdir {
						let _ = self.events.send(ScanEvent::Progress {
							subdir_index,
							subdir_total,
							files_processed,
							files_total,
						});
					}
				}
			})
			.await;

		self.check_cancel()
	}

	fn check_cancel(&self) -> Result<(), ScanError> {
		if self.cancel.is_cancelled() {
			Err(ScanError::Cancelled)
		} else {
			Ok(())
		}
	}
}

/// Split the root's direct children into regular files and directories.
async fn list_root(
	root: &Path,
	cancel: CancellationToken,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), ScanError> {
	let root = root.to_path_buf();
	tokio::task::spawn_blocking(move || {
		let mut files = Vec::new();
		let mut dirs = Vec::new();
		let entries = std::fs::read_dir(&root).map_err(|source| ScanError::ReadDir {
			path: root.clone(),
			source,
		})?;
		for entry in entries {
			if cancel.is_cancelled() {
				return Err(ScanError::Cancelled);
			}
			let entry = match entry {
				Ok(entry) => entry,
				Err(err) => {
					warn!("unreadable directory entry under {}: {err}", root.display());
					continue;
				}
			};
			let file_type = match entry.file_type() {
				Ok(file_type) => file_type,
				Err(err) => {
					warn!("cannot type {}: {err}", entry.path().display());
					continue;
				}
			};
			if file_type.is_dir() {
				dirs.push(entry.path());
			} else if file_type.is_file() {
				files.push(entry.path());
			}
		}
		Ok((files, dirs))
	})
	.await
	.expect("directory listing task panicked")
}

/// Collect every non-directory entry beneath `dir`, recursively.
/// Unreadable nested entries are reported through the event channel and
/// skipped; an unreadable `dir` itself fails the whole collection.
async fn collect_files(
	dir: PathBuf,
	events: flume::Sender<ScanEvent>,
	cancel: CancellationToken,
) -> Result<Vec<PathBuf>, ScanError> {
	tokio::task::spawn_blocking(move || {
		let mut files = Vec::new();
		for entry in WalkDir::new(&dir) {
			if cancel.is_cancelled() {
				return Err(ScanError::Cancelled);
			}
			match entry {
				Ok(entry) => {
					if !entry.file_type().is_dir() {
						files.push(entry.into_path());
					}
				}
				Err(err) if err.path() == Some(dir.as_path()) => {
					return Err(ScanError::ReadDir {
						path: dir.clone(),
						source: err
							.into_io_error()
							.unwrap_or_else(|| io::Error::other("walk failed")),
					});
				}
				Err(err) => {
					let path = err.path().map(Path::to_path_buf).unwrap_or_default();
					let _ = events.send(ScanEvent::FileFailed {
						path,
						error: err.to_string(),
					});
				}
			}
		}
		Ok(files)
	})
	.await
	.expect("file collection task panicked")
}
