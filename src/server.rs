//! Replication HTTP surface.
//!
//! `GET /_changes` exports the whole local index as one JSON array.
//! `GET /peerlist` registers the caller in an in-memory roster and
//! returns it, so a fleet can bootstrap off any node that is already
//! serving.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::record::FileRecord;
use crate::store::MetadataStore;

/// Roster of peers that have announced themselves over HTTP.
#[derive(Default)]
pub struct PeerRegistry {
	peers: Mutex<Vec<String>>,
}

impl PeerRegistry {
	/// Add a peer if it is not already present and return the roster.
	pub fn register(&self, peer: String) -> Vec<String> {
		let mut peers = self.peers.lock().unwrap();
		if !peers.contains(&peer) {
			info!(%peer, "registered peer via http");
			peers.push(peer);
		}
		peers.clone()
	}
}

#[derive(Clone)]
struct AppState {
	store: Arc<MetadataStore>,
	registry: Arc<PeerRegistry>,
	swarm_port: u16,
}

pub fn router(store: Arc<MetadataStore>, registry: Arc<PeerRegistry>, swarm_port: u16) -> Router {
	Router::new()
		.route("/_changes", get(changes))
		.route("/peerlist", get(peerlist))
		.with_state(AppState {
			store,
			registry,
			swarm_port,
		})
}

async fn changes(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, StatusCode> {
	let store = state.store.clone();
	let records = tokio::task::spawn_blocking(move || store.get_all())
		.await
		.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
		.map_err(|err| {
			error!("bulk export failed: {err}");
			StatusCode::INTERNAL_SERVER_ERROR
		})?;
	Ok(Json(records))
}

async fn peerlist(
	State(state): State<AppState>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Vec<String>> {
	let peer = format!("{}:{}", addr.ip(), state.swarm_port);
	Json(state.registry.register(peer))
}

/// Serve the router until the token fires.
pub async fn serve(
	listener: TcpListener,
	router: Router,
	cancel: CancellationToken,
) -> std::io::Result<()> {
	info!(addr = %listener.local_addr()?, "http server listening");
	axum::serve(
		listener,
		router.into_make_service_with_connect_info::<SocketAddr>(),
	)
	.with_graceful_shutdown(async move { cancel.cancelled().await })
	.await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registry_deduplicates() {
		let registry = PeerRegistry::default();
		assert_eq!(registry.register("10.0.0.1:7946".into()).len(), 1);
		assert_eq!(registry.register("10.0.0.1:7946".into()).len(), 1);
		assert_eq!(registry.register("10.0.0.2:7946".into()).len(), 2);
	}
}
