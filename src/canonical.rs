//! Cross-host path canonicalization.
//!
//! Two hosts that reach the same physical file through a shared mount
//! must derive the same identifier for it. UNC paths are rewritten to
//! `server:/share/rest`; paths under a network-filesystem mount are
//! rewritten to `device:relative` using the mount table. Everything
//! else passes through unchanged.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::debug;

/// How long a probed partition table stays valid.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Filesystem types whose mounts are shared between hosts.
const NETWORK_FS_TYPES: [&str; 5] = ["nfs", "nfs4", "cifs", "smbfs", "afp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
	pub device: String,
	pub mount_point: String,
	pub fs_type: String,
}

struct PartitionCache {
	partitions: Vec<Partition>,
	refreshed_at: Instant,
}

/// Rewrites absolute paths into their cross-host canonical form. The
/// partition table is probed lazily and cached for [`CACHE_TTL`].
pub struct Canonicalizer {
	cache: Mutex<Option<PartitionCache>>,
}

impl Default for Canonicalizer {
	fn default() -> Self {
		Self::new()
	}
}

impl Canonicalizer {
	pub fn new() -> Self {
		Self {
			cache: Mutex::new(None),
		}
	}

	/// Canonicalize an absolute path. Mount-table failures degrade to
	/// returning the input unchanged; indexing never stops here.
	pub fn canonicalize(&self, abs_path: &str) -> String {
		if cfg!(target_os = "windows") {
			return canonicalize_unc(abs_path).unwrap_or_else(|| abs_path.to_string());
		}
		let partitions = self.partitions();
		canonical_from_partitions(abs_path, &partitions).unwrap_or_else(|| abs_path.to_string())
	}

	fn partitions(&self) -> Vec<Partition> {
		let mut cache = self.cache.lock().unwrap();
		if let Some(cached) = cache.as_ref() {
			if cached.refreshed_at.elapsed() < CACHE_TTL {
				return cached.partitions.clone();
			}
		}
		let partitions = probe_partitions();
		debug!(partitions = partitions.len(), "refreshed partition table");
		*cache = Some(PartitionCache {
			partitions: partitions.clone(),
			refreshed_at: Instant::now(),
		});
		partitions
	}
}

fn probe_partitions() -> Vec<Partition> {
	Disks::new_with_refreshed_list()
		.list()
		.iter()
		.map(|disk| Partition {
			device: disk.name().to_string_lossy().into_owned(),
			mount_point: disk.mount_point().to_string_lossy().into_owned(),
			fs_type: disk.file_system().to_string_lossy().into_owned(),
		})
		.collect()
}

/// Parse a Windows UNC path into `server:/share/rest` form, with
/// forward slashes and no trailing slash when there is no remainder.
pub(crate) fn canonicalize_unc(path: &str) -> Option<String> {
	let rest = path.strip_prefix(r"\\")?;
	let mut parts = rest.splitn(3, '\\');
	let server = parts.next().filter(|s| !s.is_empty())?;
	let share = parts.next().filter(|s| !s.is_empty())?;
	match parts.next() {
		Some(tail) if !tail.is_empty() => {
			Some(format!("{server}:/{share}/{}", tail.replace('\\', "/")))
		}
		_ => Some(format!("{server}:/{share}")),
	}
}

/// Apply the network-mount rewrite: among mountpoints that prefix the
/// path, the longest wins; only network filesystems are rewritten.
pub(crate) fn canonical_from_partitions(path: &str, partitions: &[Partition]) -> Option<String> {
	let best = partitions
		.iter()
		.filter(|p| !p.mount_point.is_empty() && path.starts_with(&p.mount_point))
		.max_by_key(|p| p.mount_point.len())?;
	if !NETWORK_FS_TYPES.contains(&best.fs_type.to_lowercase().as_str()) {
		return None;
	}
	let relative = &path[best.mount_point.len()..];
	if relative.starts_with('/') {
		Some(format!("{}:{relative}", best.device))
	} else {
		Some(format!("{}:/{relative}", best.device))
	}
}
