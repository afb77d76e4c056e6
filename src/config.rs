//! Layered configuration: defaults, config file, environment, flags.
//!
//! The file is `indexer.json` in the XDG config directory (overridable
//! with `--config`). Environment variables named after the upper-cased
//! keys override the file; command-line flags override everything and
//! are merged in by the binary.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SWARM_PORT: u16 = 7946;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("read config {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("parse config {}: {source}", .path.display())]
	Parse {
		path: PathBuf,
		source: serde_json::Error,
	},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Database file; defaults to `<data home>/indexer/indexer.db`.
	pub db_path: Option<PathBuf>,
	/// Bind address of the replication HTTP surface.
	pub addr: String,
	/// Concurrent workers while indexing.
	pub workers: usize,
	pub quiet: bool,
	/// Whether to participate in a swarm at all.
	pub swarm: bool,
	/// Static peers, used in stealth mode.
	pub peers: Vec<String>,
	pub swarm_port: u16,
	/// Disable multicast discovery.
	pub stealth: bool,
	#[serde(rename = "peerListURL")]
	pub peer_list_url: Option<String>,
	/// Overrides the machine-derived host id.
	#[serde(rename = "hostID")]
	pub host_id: Option<String>,
	/// Write cache tuning.
	pub batch_size: usize,
	pub flush_interval_ms: u64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			db_path: None,
			addr: DEFAULT_ADDR.to_string(),
			workers: DEFAULT_WORKERS,
			quiet: false,
			swarm: false,
			peers: Vec::new(),
			swarm_port: DEFAULT_SWARM_PORT,
			stealth: false,
			peer_list_url: None,
			host_id: None,
			batch_size: DEFAULT_BATCH_SIZE,
			flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
		}
	}
}

impl Config {
	/// Load the config file (when present) and apply environment
	/// overrides. A missing file is not an error.
	pub fn load(path_override: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match Self::config_file(path_override) {
			Some(path) if path.exists() => {
				let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
					path: path.clone(),
					source,
				})?;
				let config: Self =
					serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
						path: path.clone(),
						source,
					})?;
				debug!(path = %path.display(), "loaded config file");
				config
			}
			_ => Self::default(),
		};
		config.apply_env();
		Ok(config)
	}

	fn config_file(path_override: Option<&Path>) -> Option<PathBuf> {
		match path_override {
			Some(path) => Some(path.to_path_buf()),
			None => dirs::config_dir().map(|dir| dir.join("indexer.json")),
		}
	}

	fn apply_env(&mut self) {
		if let Some(v) = env_string("DBPATH") {
			self.db_path = Some(PathBuf::from(v));
		}
		if let Some(v) = env_string("ADDR") {
			self.addr = v;
		}
		if let Some(v) = env_string("WORKERS") {
			if let Ok(workers) = v.parse() {
				self.workers = workers;
			}
		}
		if let Some(v) = env_string("QUIET") {
			self.quiet = parse_bool(&v);
		}
		if let Some(v) = env_string("SWARM") {
			self.swarm = parse_bool(&v);
		}
		if let Some(v) = env_string("PEERS") {
			self.peers = v.split(',').map(|p| p.trim().to_string()).collect();
		}
		if let Some(v) = env_string("SWARMPORT") {
			if let Ok(port) = v.parse() {
				self.swarm_port = port;
			}
		}
		if let Some(v) = env_string("STEALTH") {
			self.stealth = parse_bool(&v);
		}
		if let Some(v) = env_string("PEERLISTURL") {
			self.peer_list_url = Some(v);
		}
		if let Some(v) = env_string("HOSTID") {
			self.host_id = Some(v);
		}
	}

	pub fn db_path(&self) -> PathBuf {
		self.db_path.clone().unwrap_or_else(default_db_path)
	}
}

/// `<data home>/indexer/indexer.db`.
pub fn default_db_path() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("indexer")
		.join("indexer.db")
}

fn env_string(key: &str) -> Option<String> {
	env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_bool(v: &str) -> bool {
	matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	// Tests that touch process environment must not interleave.
	static ENV_LOCK: Mutex<()> = Mutex::new(());

	#[test]
	fn defaults_are_sane() {
		let config = Config::default();
		assert_eq!(config.addr, DEFAULT_ADDR);
		assert_eq!(config.swarm_port, DEFAULT_SWARM_PORT);
		assert_eq!(config.workers, 1);
		assert!(!config.swarm);
		assert!(config.db_path().ends_with("indexer/indexer.db"));
	}

	#[test]
	fn file_is_loaded_and_missing_file_is_tolerated() {
		let _env = ENV_LOCK.lock().unwrap();
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("indexer.json");
		std::fs::write(
			&path,
			r#"{"swarmPort": 9000, "peers": ["10.0.0.9:9000"], "hostID": "abc"}"#,
		)
		.unwrap();

		let config = Config::load(Some(&path)).unwrap();
		assert_eq!(config.swarm_port, 9000);
		assert_eq!(config.peers, vec!["10.0.0.9:9000".to_string()]);
		assert_eq!(config.host_id.as_deref(), Some("abc"));
		// Unspecified keys keep their defaults.
		assert_eq!(config.addr, DEFAULT_ADDR);

		let missing = Config::load(Some(&dir.path().join("absent.json"))).unwrap();
		assert_eq!(missing.swarm_port, DEFAULT_SWARM_PORT);
	}

	#[test]
	fn malformed_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("indexer.json");
		std::fs::write(&path, "{not json").unwrap();
		assert!(matches!(
			Config::load(Some(&path)),
			Err(ConfigError::Parse { .. }),
		));
	}

	#[test]
	fn environment_overrides_the_file() {
		let _env = ENV_LOCK.lock().unwrap();
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("indexer.json");
		std::fs::write(&path, r#"{"swarmPort": 9000}"#).unwrap();

		env::set_var("SWARMPORT", "9100");
		env::set_var("STEALTH", "true");
		env::set_var("PEERS", "10.0.0.1:9100, 10.0.0.2:9100");
		let config = Config::load(Some(&path)).unwrap();
		env::remove_var("SWARMPORT");
		env::remove_var("STEALTH");
		env::remove_var("PEERS");

		assert_eq!(config.swarm_port, 9100);
		assert!(config.stealth);
		assert_eq!(
			config.peers,
			vec!["10.0.0.1:9100".to_string(), "10.0.0.2:9100".to_string()],
		);
	}
}
