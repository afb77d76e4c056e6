//! Peer discovery: HTTP peer lists, multicast advertisement, stealth.
//!
//! Exactly one mode applies per process, with fixed precedence: an
//! explicit peer-list URL wins, stealth skips multicast entirely, and
//! multicast is the default.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::Config;

/// Service type advertised and browsed on the local network.
pub const SERVICE_TYPE: &str = "_indexer._tcp.local.";
/// Token carried in the TXT record.
const SERVICE_TOKEN: &str = "Hello friend";
/// How long the browse window stays open collecting peers.
const BROWSE_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("mdns: {0}")]
	Mdns(#[from] mdns_sd::Error),
	#[error("peer list fetch: {0}")]
	Fetch(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
	PeerListUrl(String),
	Multicast,
	Stealth(Vec<String>),
}

/// Pick the discovery mode from configuration. Precedence: URL, then
/// multicast, then stealth.
pub fn resolve_mode(config: &Config) -> DiscoveryMode {
	if let Some(url) = &config.peer_list_url {
		if !url.is_empty() {
			return DiscoveryMode::PeerListUrl(url.clone());
		}
	}
	if config.stealth {
		return DiscoveryMode::Stealth(config.peers.clone());
	}
	DiscoveryMode::Multicast
}

/// Keeps the multicast advertisement registered. Dropping it without
/// calling [`MdnsGuard::shutdown`] leaves the record to expire on its
/// own.
pub struct MdnsGuard {
	daemon: ServiceDaemon,
	fullname: String,
}

impl MdnsGuard {
	pub fn shutdown(self) {
		let _ = self.daemon.unregister(&self.fullname);
		let _ = self.daemon.shutdown();
	}
}

/// Run one round of discovery and return the peers to join, plus the
/// advertisement guard when multicast is active.
pub async fn discover_peers(
	mode: &DiscoveryMode,
	node_name: &str,
	swarm_port: u16,
) -> Result<(Vec<String>, Option<MdnsGuard>), DiscoveryError> {
	match mode {
		DiscoveryMode::PeerListUrl(url) => {
			let peers = fetch_peer_list(url).await?;
			Ok((peers, None))
		}
		DiscoveryMode::Stealth(peers) => Ok((peers.clone(), None)),
		DiscoveryMode::Multicast => {
			let local_ip = local_ipv4();
			let guard = match advertise(node_name, local_ip, swarm_port) {
				Ok(guard) => Some(guard),
				Err(err) => {
					warn!("mdns advertisement failed: {err}");
					None
				}
			};
			let peers = browse(local_ip, swarm_port).await?;
			Ok((peers, guard))
		}
	}
}

/// Fetch a JSON array of `host:port` strings.
pub async fn fetch_peer_list(url: &str) -> Result<Vec<String>, DiscoveryError> {
	let peers = reqwest::get(url)
		.await?
		.error_for_status()?
		.json::<Vec<String>>()
		.await?;
	Ok(peers)
}

fn advertise(node_name: &str, ip: Ipv4Addr, port: u16) -> Result<MdnsGuard, DiscoveryError> {
	let daemon = ServiceDaemon::new()?;
	let mut properties = HashMap::new();
	properties.insert("info".to_string(), SERVICE_TOKEN.to_string());
	let service = ServiceInfo::new(
		SERVICE_TYPE,
		node_name,
		&format!("{node_name}."),
		ip,
		port,
		Some(properties),
	)?;
	let fullname = service.get_fullname().to_string();
	daemon.register(service)?;
	debug!(%fullname, "advertising mdns service");
	Ok(MdnsGuard { daemon, fullname })
}

async fn browse(local_ip: Ipv4Addr, swarm_port: u16) -> Result<Vec<String>, DiscoveryError> {
	let daemon = ServiceDaemon::new()?;
	let receiver = daemon.browse(SERVICE_TYPE)?;
	let mut window = Box::pin(sleep_until(Instant::now() + BROWSE_WINDOW));
	let mut peers = Vec::new();

	loop {
		tokio::select! {
			_ = window.as_mut() => break,
			event = receiver.recv_async() => match event {
				Ok(ServiceEvent::ServiceResolved(info)) => {
					for addr in info.get_addresses() {
						if *addr == local_ip {
							continue;
						}
						let peer = format!("{addr}:{swarm_port}");
						if !peers.contains(&peer) {
							debug!(%peer, "discovered peer");
							peers.push(peer);
						}
					}
				}
				Ok(_) => {}
				Err(_) => break,
			},
		}
	}

	let _ = daemon.shutdown();
	Ok(peers)
}

/// Best-effort local IPv4 address, falling back to loopback. The probe
/// socket never sends a packet.
pub fn local_ipv4() -> Ipv4Addr {
	let fallback = Ipv4Addr::LOCALHOST;
	let Ok(socket) = UdpSocket::bind(("0.0.0.0", 0)) else {
		return fallback;
	};
	if socket.connect(("8.8.8.8", 80)).is_err() {
		return fallback;
	}
	match socket.local_addr() {
		Ok(SocketAddr::V4(addr)) => *addr.ip(),
		_ => fallback,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;

	#[test]
	fn url_takes_precedence_over_everything() {
		let config = Config {
			peer_list_url: Some("http://example/peers".into()),
			stealth: true,
			peers: vec!["10.0.0.1:7946".into()],
			..Config::default()
		};
		assert_eq!(
			resolve_mode(&config),
			DiscoveryMode::PeerListUrl("http://example/peers".into()),
		);
	}

	#[test]
	fn stealth_skips_multicast() {
		let config = Config {
			stealth: true,
			peers: vec!["10.0.0.1:7946".into()],
			..Config::default()
		};
		assert_eq!(
			resolve_mode(&config),
			DiscoveryMode::Stealth(vec!["10.0.0.1:7946".into()]),
		);
	}

	#[test]
	fn multicast_is_the_default() {
		assert_eq!(resolve_mode(&Config::default()), DiscoveryMode::Multicast);
	}

	#[test]
	fn empty_url_does_not_count() {
		let config = Config {
			peer_list_url: Some(String::new()),
			..Config::default()
		};
		assert_eq!(resolve_mode(&config), DiscoveryMode::Multicast);
	}
}
