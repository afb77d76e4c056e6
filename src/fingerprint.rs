//! Content fingerprinting with bounded-cost sampling for large files.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Size of each sampled window.
pub const SAMPLE_WINDOW: u64 = 1 << 20;

#[derive(Debug, Error)]
pub enum FingerprintError {
	#[error("open {}: {source}", .path.display())]
	Open {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("stat {}: {source}", .path.display())]
	Stat {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("seek to {offset} in {}: {source}", .path.display())]
	Seek {
		path: PathBuf,
		offset: u64,
		source: std::io::Error,
	},
	#[error("read {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},
}

/// Compute the BLAKE3 fingerprint of a file as lowercase hex.
///
/// Files smaller than three windows are hashed whole. Larger files hash
/// the concatenation of a head, middle and tail window, in that order,
/// so the cost is bounded no matter how large the file is. The window
/// positions depend only on the file size, which keeps the digest
/// reproducible across hosts.
pub async fn fingerprint_file(path: &Path) -> Result<String, FingerprintError> {
	let mut file = File::open(path).await.map_err(|source| FingerprintError::Open {
		path: path.to_path_buf(),
		source,
	})?;
	let size = file
		.metadata()
		.await
		.map_err(|source| FingerprintError::Stat {
			path: path.to_path_buf(),
			source,
		})?
		.len();

	let mut hasher = blake3::Hasher::new();
	if size < 3 * SAMPLE_WINDOW {
		let mut contents = Vec::with_capacity(size as usize);
		file.read_to_end(&mut contents)
			.await
			.map_err(|source| FingerprintError::Read {
				path: path.to_path_buf(),
				source,
			})?;
		hasher.update(&contents);
	} else {
		let mut window = vec![0u8; SAMPLE_WINDOW as usize];
		for offset in [0, size / 2, size - SAMPLE_WINDOW] {
			read_at(&mut file, path, offset, &mut window).await?;
			hasher.update(&window);
		}
	}

	Ok(hasher.finalize().to_hex().to_string())
}

async fn read_at(
	file: &mut File,
	path: &Path,
	offset: u64,
	buf: &mut [u8],
) -> Result<(), FingerprintError> {
	file.seek(SeekFrom::Start(offset))
		.await
		.map_err(|source| FingerprintError::Seek {
			path: path.to_path_buf(),
			offset,
			source,
		})?;
	file.read_exact(buf)
		.await
		.map_err(|source| FingerprintError::Read {
			path: path.to_path_buf(),
			source,
		})?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	const W: usize = SAMPLE_WINDOW as usize;

	async fn digest_of(contents: &[u8]) -> String {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sample");
		tokio::fs::write(&path, contents).await.unwrap();
		fingerprint_file(&path).await.unwrap()
	}

	#[tokio::test]
	async fn small_file_hashes_whole_contents() {
		let contents = vec![b'A'; 1000];
		let digest = digest_of(&contents).await;
		assert_eq!(digest, blake3::hash(&contents).to_hex().to_string());
	}

	#[tokio::test]
	async fn digest_is_deterministic() {
		let contents = vec![0x5a; 4096];
		assert_eq!(digest_of(&contents).await, digest_of(&contents).await);
	}

	#[tokio::test]
	async fn below_sampling_threshold_hashes_whole_contents() {
		let contents = vec![0x11; 3 * W - 1];
		let digest = digest_of(&contents).await;
		assert_eq!(digest, blake3::hash(&contents).to_hex().to_string());
	}

	#[tokio::test]
	async fn at_sampling_threshold_hashes_three_windows() {
		let mut contents = vec![0u8; 3 * W];
		for (i, byte) in contents.iter_mut().enumerate() {
			*byte = (i % 251) as u8;
		}
		let digest = digest_of(&contents).await;

		let mid = contents.len() / 2;
		let mut sampled = Vec::with_capacity(3 * W);
		sampled.extend_from_slice(&contents[..W]);
		sampled.extend_from_slice(&contents[mid..mid + W]);
		sampled.extend_from_slice(&contents[contents.len() - W..]);
		assert_eq!(digest, blake3::hash(&sampled).to_hex().to_string());
	}

	#[tokio::test]
	async fn unsampled_interior_does_not_affect_digest() {
		let size = 3 * W + 1;
		let mut contents = vec![0u8; size];
		let mid = size / 2;
		contents[..W].fill(0x01);
		contents[W..mid + W].fill(0x02);
		contents[size - W..].fill(0x03);
		let digest = digest_of(&contents).await;

		let mut sampled = Vec::with_capacity(3 * W);
		sampled.extend_from_slice(&contents[..W]);
		sampled.extend_from_slice(&contents[mid..mid + W]);
		sampled.extend_from_slice(&contents[size - W..]);
		assert_eq!(digest, blake3::hash(&sampled).to_hex().to_string());

		// A byte outside every window must be invisible to the digest.
		contents[W + 7] = 0xff;
		assert_eq!(digest_of(&contents).await, digest);
	}

	#[tokio::test]
	async fn missing_file_fails_on_open() {
		let err = fingerprint_file(Path::new("/nonexistent/swarmdex-test")).await;
		assert!(matches!(err, Err(FingerprintError::Open { .. })));
	}
}
