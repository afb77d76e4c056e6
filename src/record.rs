//! File metadata records and their flat JSON coding.
//!
//! A record serializes to a single flat JSON object: the known fields
//! plus every entry of its open `extra` map lifted to the top level. On
//! decode, members that are not known fields are collected back into
//! `extra`, so unknown data survives a round trip through any node.

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity;

/// Top-level JSON members owned by the record itself. An `extra` entry
/// with one of these keys is never emitted.
pub const KNOWN_KEYS: [&str; 7] = [
	"_id", "idString", "hostID", "filePath", "size", "modTime", "blake3",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileRecord {
	/// Primary key: a v5 UUID of `id_string`, as a hyphenated string.
	pub id: String,
	/// The composite string `id` was derived from, kept for audit.
	pub id_string: String,
	/// Identifier of the host that made the observation. Replicated
	/// copies keep the original observer's id.
	pub host_id: String,
	/// Canonical, cross-host-meaningful path.
	pub file_path: String,
	/// Byte count at indexing time.
	pub size: i64,
	/// RFC 3339 modification timestamp.
	pub mod_time: String,
	/// Hex BLAKE3 content fingerprint.
	pub digest: String,
	/// Open extension map, flattened into the top-level JSON object.
	pub extra: Map<String, Value>,
}

impl FileRecord {
	/// Build a record for a fresh observation, deriving its identity.
	pub fn new(
		host_id: String,
		file_path: String,
		size: i64,
		mod_time: String,
		digest: String,
	) -> Self {
		let id_string = identity::id_string(&host_id, &file_path, &mod_time, size, &digest);
		let id = identity::record_id(&id_string).to_string();
		Self {
			id,
			id_string,
			host_id,
			file_path,
			size,
			mod_time,
			digest,
			extra: Map::new(),
		}
	}
}

impl Serialize for FileRecord {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(None)?;
		map.serialize_entry("_id", &self.id)?;
		map.serialize_entry("idString", &self.id_string)?;
		map.serialize_entry("hostID", &self.host_id)?;
		map.serialize_entry("filePath", &self.file_path)?;
		map.serialize_entry("size", &self.size)?;
		map.serialize_entry("modTime", &self.mod_time)?;
		map.serialize_entry("blake3", &self.digest)?;
		for (key, value) in &self.extra {
			if !KNOWN_KEYS.contains(&key.as_str()) {
				map.serialize_entry(key, value)?;
			}
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for FileRecord {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let mut object = Map::deserialize(deserializer)?;

		// Known members with the wrong JSON type are dropped rather than
		// rejected; a decoder on the gossip path must stay tolerant.
		let mut take_string = |key: &str| match object.remove(key) {
			Some(Value::String(s)) => s,
			_ => String::new(),
		};
		let id = take_string("_id");
		let id_string = take_string("idString");
		let host_id = take_string("hostID");
		let file_path = take_string("filePath");
		let mod_time = take_string("modTime");
		let digest = take_string("blake3");
		let size = object
			.remove("size")
			.and_then(|value| value.as_i64())
			.unwrap_or(0);

		Ok(Self {
			id,
			id_string,
			host_id,
			file_path,
			size,
			mod_time,
			digest,
			extra: object,
		})
	}
}
