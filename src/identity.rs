//! Composite record identity.
//!
//! A record is keyed by a v5 UUID derived from the concatenation of
//! everything that makes an observation unique: the observing host, the
//! canonical path, the modification time, the size and the content
//! digest. The same file observed twice produces the same key.

use uuid::Uuid;

/// The composite identity string. Size is rendered as lowercase hex.
pub fn id_string(
	host_id: &str,
	canonical_path: &str,
	mod_time: &str,
	size: i64,
	digest: &str,
) -> String {
	format!("{host_id}|{canonical_path}|{mod_time}|{size:x}|{digest}")
}

/// The record key: a v5 UUID of the identity string under the URL
/// namespace.
pub fn record_id(id_string: &str) -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_URL, id_string.as_bytes())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn id_string_concatenates_with_pipes() {
		let s = id_string("host-a", "/data/file", "2024-06-01T12:00:00Z", 255, "abcd");
		assert_eq!(s, "host-a|/data/file|2024-06-01T12:00:00Z|ff|abcd");
	}

	#[test]
	fn record_id_is_stable_for_identical_inputs() {
		let a = record_id(&id_string("h", "/p", "t", 1, "d"));
		let b = record_id(&id_string("h", "/p", "t", 1, "d"));
		assert_eq!(a, b);
	}

	#[test]
	fn record_id_changes_with_any_input() {
		let base = record_id(&id_string("h", "/p", "t", 1, "d"));
		assert_ne!(base, record_id(&id_string("h2", "/p", "t", 1, "d")));
		assert_ne!(base, record_id(&id_string("h", "/p2", "t", 1, "d")));
		assert_ne!(base, record_id(&id_string("h", "/p", "t2", 1, "d")));
		assert_ne!(base, record_id(&id_string("h", "/p", "t", 2, "d")));
		assert_ne!(base, record_id(&id_string("h", "/p", "t", 1, "d2")));
	}

	#[test]
	fn record_id_is_version_five() {
		let id = record_id("anything");
		assert_eq!(id.get_version_num(), 5);
	}
}
