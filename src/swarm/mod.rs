//! Self-forming swarm membership and gossip replication.
//!
//! The swarm is deliberately minimal: members are learned at join time
//! through a push/pull state exchange and never evicted, matching the
//! monotonic detached → joining → joined lifecycle of a node. Queued
//! broadcasts fan out to a few random members on a short interval.

pub mod broadcast;
pub mod delegate;
pub mod discovery;
pub mod proto;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::delegate::Delegate;
use self::proto::{read_frame, write_frame, Frame, FrameError};

/// How often queued broadcasts are pushed to random members.
const GOSSIP_INTERVAL: Duration = Duration::from_millis(200);
/// Members contacted per gossip round.
const GOSSIP_FANOUT: usize = 3;
/// Byte budget per gossip frame.
const GOSSIP_PACKET_BUDGET: usize = 1 << 20;
/// Per-payload framing overhead charged against the budget.
const PAYLOAD_OVERHEAD: usize = 2;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
	pub name: String,
	pub addr: SocketAddr,
}

#[derive(Debug, Error)]
pub enum SwarmError {
	#[error("bind {addr}: {source}")]
	Bind {
		addr: SocketAddr,
		source: std::io::Error,
	},
	#[error("connect {addr}: {source}")]
	Connect {
		addr: String,
		source: std::io::Error,
	},
	#[error("{addr}: timed out")]
	Timeout { addr: String },
	#[error("{addr}: unexpected reply")]
	UnexpectedReply { addr: String },
	#[error(transparent)]
	Frame(#[from] FrameError),
}

pub struct SwarmConfig {
	pub node_name: String,
	/// Address the membership listener binds to.
	pub bind_addr: SocketAddr,
	/// Address other peers should dial; defaults to the bound address.
	pub advertise_addr: Option<SocketAddr>,
}

struct Shared {
	local: Member,
	members: RwLock<HashMap<String, Member>>,
	delegate: Arc<dyn Delegate>,
}

pub struct Swarm {
	shared: Arc<Shared>,
	cancel: CancellationToken,
}

impl Swarm {
	/// Bind the membership listener and start the accept and gossip
	/// loops. The node is reachable (joinable by others) from here on,
	/// even if it never joins anyone itself.
	pub async fn create(
		config: SwarmConfig,
		delegate: Arc<dyn Delegate>,
		cancel: CancellationToken,
	) -> Result<Self, SwarmError> {
		let listener = TcpListener::bind(config.bind_addr)
			.await
			.map_err(|source| SwarmError::Bind {
				addr: config.bind_addr,
				source,
			})?;
		let local_addr = listener.local_addr().map_err(|source| SwarmError::Bind {
			addr: config.bind_addr,
			source,
		})?;
		let advertise = config.advertise_addr.unwrap_or(local_addr);

		let shared = Arc::new(Shared {
			local: Member {
				name: config.node_name.clone(),
				addr: advertise,
			},
			members: RwLock::new(HashMap::new()),
			delegate,
		});

		tokio::spawn(accept_loop(listener, shared.clone(), cancel.clone()));
		tokio::spawn(gossip_loop(shared.clone(), cancel.clone()));
		info!(node = %config.node_name, addr = %advertise, "swarm node started");

		Ok(Self { shared, cancel })
	}

	pub fn local_member(&self) -> Member {
		self.shared.local.clone()
	}

	/// Number of known members, including this node.
	pub fn num_members(&self) -> usize {
		self.shared.members.read().unwrap().len() + 1
	}

	/// A capability handing the live member count to the broadcast
	/// queue without tying the queue to the membership type.
	pub fn member_count_fn(&self) -> impl Fn() -> usize + Send + Sync + 'static {
		let shared = Arc::downgrade(&self.shared);
		move || {
			shared
				.upgrade()
				.map(|s| s.members.read().unwrap().len() + 1)
				.unwrap_or(1)
		}
	}

	/// Join every reachable peer, running the anti-entropy push/pull
	/// exchange with each. Returns how many peers answered; failures
	/// are logged and the node keeps operating with whoever it found.
	pub async fn join(&self, peers: &[String]) -> usize {
		let mut joined = 0;
		for peer in peers {
			match self.join_one(peer).await {
				Ok(()) => joined += 1,
				Err(err) => warn!(peer = %peer, "join failed: {err}"),
			}
		}
		joined
	}

	async fn join_one(&self, peer: &str) -> Result<(), SwarmError> {
		let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(peer))
			.await
			.map_err(|_| SwarmError::Timeout {
				addr: peer.to_string(),
			})?
			.map_err(|source| SwarmError::Connect {
				addr: peer.to_string(),
				source,
			})?;

		let state = self.shared.delegate.local_state(true);
		write_frame(
			&mut stream,
			&Frame::Join {
				member: self.shared.local.clone(),
				state,
			},
		)
		.await?;

		match timeout(CONNECT_TIMEOUT, read_frame(&mut stream)).await {
			Ok(Ok(Frame::PushPull { members, state })) => {
				self.shared.delegate.merge_remote_state(&state, true);
				let mut known = self.shared.members.write().unwrap();
				for member in members {
					if member.name != self.shared.local.name {
						known.insert(member.name.clone(), member);
					}
				}
				Ok(())
			}
			Ok(Ok(_)) => Err(SwarmError::UnexpectedReply {
				addr: peer.to_string(),
			}),
			Ok(Err(err)) => Err(err.into()),
			Err(_) => Err(SwarmError::Timeout {
				addr: peer.to_string(),
			}),
		}
	}

	pub fn shutdown(&self) {
		self.cancel.cancel();
	}
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
	loop {
		let stream = tokio::select! {
			_ = cancel.cancelled() => break,
			accepted = listener.accept() => match accepted {
				Ok((stream, _)) => stream,
				Err(err) => {
					warn!("accept failed: {err}");
					continue;
				}
			},
		};
		let shared = shared.clone();
		tokio::spawn(async move {
			if let Err(err) = handle_conn(stream, shared).await {
				debug!("peer connection ended: {err}");
			}
		});
	}
}

async fn handle_conn(mut stream: TcpStream, shared: Arc<Shared>) -> Result<(), SwarmError> {
	loop {
		let frame = match read_frame(&mut stream).await {
			Ok(frame) => frame,
			Err(FrameError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
				return Ok(());
			}
			Err(err) => return Err(err.into()),
		};
		match frame {
			Frame::Join { member, state } => {
				info!(node = %member.name, addr = %member.addr, "member joined");
				if member.name != shared.local.name {
					shared
						.members
						.write()
						.unwrap()
						.insert(member.name.clone(), member);
				}
				shared.delegate.merge_remote_state(&state, true);

				let roster = {
					let members = shared.members.read().unwrap();
					let mut roster: Vec<Member> = members.values().cloned().collect();
					roster.push(shared.local.clone());
					roster
				};
				let state = shared.delegate.local_state(true);
				write_frame(
					&mut stream,
					&Frame::PushPull {
						members: roster,
						state,
					},
				)
				.await?;
			}
			Frame::Gossip { payloads } => {
				for payload in payloads {
					shared.delegate.notify_msg(&payload);
				}
			}
			Frame::PushPull { .. } => {
				debug!("ignoring unsolicited push/pull");
			}
		}
	}
}

async fn gossip_loop(shared: Arc<Shared>, cancel: CancellationToken) {
	let mut tick = interval(GOSSIP_INTERVAL);
	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = tick.tick() => {}
		}

		let targets: Vec<Member> = {
			let members = shared.members.read().unwrap();
			let list: Vec<Member> = members.values().cloned().collect();
			list.choose_multiple(&mut rand::thread_rng(), GOSSIP_FANOUT)
				.cloned()
				.collect()
		};
		if targets.is_empty() {
			continue;
		}

		let payloads = shared
			.delegate
			.get_broadcasts(PAYLOAD_OVERHEAD, GOSSIP_PACKET_BUDGET);
		if payloads.is_empty() {
			continue;
		}
		debug!(payloads = payloads.len(), targets = targets.len(), "gossip round");

		for target in targets {
			let frame = Frame::Gossip {
				payloads: payloads.clone(),
			};
			tokio::spawn(async move {
				match timeout(CONNECT_TIMEOUT, TcpStream::connect(target.addr)).await {
					Ok(Ok(mut stream)) => {
						if let Err(err) = write_frame(&mut stream, &frame).await {
							warn!(peer = %target.addr, "gossip send failed: {err}");
						}
					}
					Ok(Err(err)) => warn!(peer = %target.addr, "gossip connect failed: {err}"),
					Err(_) => warn!(peer = %target.addr, "gossip connect timed out"),
				}
			});
		}
	}
}
