//! Stable per-machine identity.
//!
//! Records carry the id of the host that observed them, so it has to
//! survive reboots and be distinct per machine. The id is derived from
//! the OS machine id, keyed to this application so the raw machine id
//! never appears in any record. Configuration can override it outright.

use data_encoding::HEXLOWER;
use thiserror::Error;

/// Key-derivation context scoping machine ids to this application.
const HOST_ID_CONTEXT: &str = "swarmdex 2024-06-01 host identity";

#[derive(Debug, Error)]
pub enum HostIdError {
	#[error("no machine id source available: {0}")]
	Unavailable(String),
}

/// Resolve the host id: a non-empty configured override wins, otherwise
/// the machine id is probed and hashed into an application-scoped id.
pub fn host_id(override_id: Option<&str>) -> Result<String, HostIdError> {
	if let Some(id) = override_id {
		if !id.is_empty() {
			return Ok(id.to_string());
		}
	}
	let machine = machine_id()?;
	let derived = blake3::derive_key(HOST_ID_CONTEXT, machine.trim().as_bytes());
	Ok(HEXLOWER.encode(&derived))
}

#[cfg(target_os = "linux")]
fn machine_id() -> Result<String, HostIdError> {
	for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
		if let Ok(contents) = std::fs::read_to_string(path) {
			let id = contents.trim();
			if !id.is_empty() {
				return Ok(id.to_string());
			}
		}
	}
	// Containers and appliances may lack a machine-id database.
	hostname_fallback()
}

#[cfg(target_os = "macos")]
fn machine_id() -> Result<String, HostIdError> {
	let output = std::process::Command::new("ioreg")
		.args(["-rd1", "-c", "IOPlatformExpertDevice"])
		.output()
		.map_err(|err| HostIdError::Unavailable(format!("ioreg: {err}")))?;
	let text = String::from_utf8_lossy(&output.stdout);
	for line in text.lines() {
		if line.contains("IOPlatformUUID") {
			if let Some(uuid) = line.split('"').nth(3) {
				return Ok(uuid.to_string());
			}
		}
	}
	hostname_fallback()
}

#[cfg(target_os = "windows")]
fn machine_id() -> Result<String, HostIdError> {
	let output = std::process::Command::new("reg")
		.args([
			"query",
			r"HKLM\SOFTWARE\Microsoft\Cryptography",
			"/v",
			"MachineGuid",
		])
		.output()
		.map_err(|err| HostIdError::Unavailable(format!("reg query: {err}")))?;
	let text = String::from_utf8_lossy(&output.stdout);
	for line in text.lines() {
		if line.trim_start().starts_with("MachineGuid") {
			if let Some(guid) = line.split_whitespace().last() {
				return Ok(guid.to_string());
			}
		}
	}
	hostname_fallback()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn machine_id() -> Result<String, HostIdError> {
	hostname_fallback()
}

fn hostname_fallback() -> Result<String, HostIdError> {
	sysinfo::System::host_name()
		.filter(|name| !name.is_empty())
		.ok_or_else(|| HostIdError::Unavailable("no machine id and no hostname".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn override_wins() {
		assert_eq!(host_id(Some("custom")).unwrap(), "custom");
	}

	#[test]
	fn empty_override_is_ignored() {
		let derived = host_id(Some("")).unwrap();
		assert_ne!(derived, "");
	}

	#[test]
	fn derived_id_is_hex_and_stable() {
		let first = host_id(None).unwrap();
		let second = host_id(None).unwrap();
		assert_eq!(first, second);
		assert_eq!(first.len(), 64);
		assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
	}
}
