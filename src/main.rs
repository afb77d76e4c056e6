//! swarmdex command line interface.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swarmdex::config::Config;
use swarmdex::host;
use swarmdex::processor::{FileProcessor, RecordSink};
use swarmdex::server::{self, PeerRegistry};
use swarmdex::store::writer::CacheWriter;
use swarmdex::store::MetadataStore;
use swarmdex::swarm::broadcast::TransmitLimitedQueue;
use swarmdex::swarm::delegate::IndexDelegate;
use swarmdex::swarm::discovery::{self, MdnsGuard};
use swarmdex::swarm::{Swarm, SwarmConfig};
use swarmdex::walker::{ScanError, ScanEvent, Walker};

#[derive(Parser)]
#[command(
	name = "swarmdex",
	version,
	about = "Index files and replicate their metadata across a swarm"
)]
struct Cli {
	/// Config file (default: indexer.json in the XDG config directory).
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Path to the database file (default: XDG data directory).
	#[arg(long, global = true)]
	dbpath: Option<PathBuf>,
	/// Address to serve the replication endpoint.
	#[arg(long, global = true)]
	addr: Option<String>,
	/// Number of concurrent workers while indexing.
	#[arg(long, global = true)]
	workers: Option<usize>,
	/// Enable swarm mode for p2p replication.
	#[arg(long, global = true)]
	swarm: bool,
	/// Comma-separated list of peer addresses to join.
	#[arg(long, global = true, value_delimiter = ',')]
	peers: Vec<String>,
	/// Port for the swarm membership transport.
	#[arg(long = "swarmPort", global = true)]
	swarm_port: Option<u16>,
	/// Disable multicast auto-discovery (requires a manual peer list).
	#[arg(long, global = true)]
	stealth: bool,
	/// HTTP/HTTPS URL that returns a JSON array of peer addresses.
	#[arg(long = "peerListURL", global = true)]
	peer_list_url: Option<String>,
	/// Suppress spinner and progress messages.
	#[arg(long, global = true)]
	quiet: bool,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Scan a directory and index files with live status updates.
	Index { directory: PathBuf },
	/// Run in daemon mode, exposing the /_changes and /peerlist endpoints.
	Serve,
	/// Dump the persistent database contents.
	Dump {
		#[arg(long, value_enum, default_value = "json")]
		format: DumpFormat,
	},
}

#[derive(Clone, Copy, ValueEnum)]
enum DumpFormat {
	Json,
	Tsv,
}

struct SwarmParts {
	swarm: Swarm,
	broadcasts: Arc<TransmitLimitedQueue>,
	mdns: Option<MdnsGuard>,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	init_tracing(cli.quiet);

	let config = match resolve_config(&cli) {
		Ok(config) => config,
		Err(err) => return fatal(&format!("invalid configuration: {err}")),
	};

	let cancel = CancellationToken::new();
	spawn_signal_handler(cancel.clone());

	match &cli.command {
		Commands::Index { directory } => cmd_index(directory, &config, cancel).await,
		Commands::Serve => cmd_serve(&config, cancel).await,
		Commands::Dump { format } => cmd_dump(&config, *format),
	}
}

fn resolve_config(cli: &Cli) -> Result<Config, swarmdex::config::ConfigError> {
	let mut config = Config::load(cli.config.as_deref())?;
	if let Some(dbpath) = &cli.dbpath {
		config.db_path = Some(dbpath.clone());
	}
	if let Some(addr) = &cli.addr {
		config.addr = addr.clone();
	}
	if let Some(workers) = cli.workers {
		config.workers = workers;
	}
	if cli.swarm {
		config.swarm = true;
	}
	if !cli.peers.is_empty() {
		config.peers = cli.peers.clone();
	}
	if let Some(port) = cli.swarm_port {
		config.swarm_port = port;
	}
	if cli.stealth {
		config.stealth = true;
	}
	if let Some(url) = &cli.peer_list_url {
		config.peer_list_url = Some(url.clone());
	}
	if cli.quiet {
		config.quiet = true;
	}
	Ok(config)
}

fn init_tracing(quiet: bool) {
	let default = if quiet { "warn" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.init();
}

fn fatal(message: &str) -> ExitCode {
	eprintln!("{} {message}", "error:".red().bold());
	ExitCode::FAILURE
}

fn spawn_signal_handler(cancel: CancellationToken) {
	tokio::spawn(async move {
		let ctrl_c = tokio::signal::ctrl_c();
		#[cfg(unix)]
		{
			use tokio::signal::unix::{signal, SignalKind};
			match signal(SignalKind::terminate()) {
				Ok(mut term) => {
					tokio::select! {
						_ = ctrl_c => {}
						_ = term.recv() => {}
					}
				}
				Err(_) => {
					let _ = ctrl_c.await;
				}
			}
		}
		#[cfg(not(unix))]
		{
			let _ = ctrl_c.await;
		}
		info!("shutdown signal received");
		cancel.cancel();
	});
}

/// Start the membership service, discover peers and join them. Join
/// failures leave the node as a solitary peer that others can find.
async fn start_swarm(
	config: &Config,
	store: Arc<MetadataStore>,
	cancel: &CancellationToken,
) -> Option<SwarmParts> {
	let broadcasts = Arc::new(TransmitLimitedQueue::new(3));
	let delegate = Arc::new(IndexDelegate::new(store, broadcasts.clone()));

	let node_name = swarm_node_name();
	let local_ip = discovery::local_ipv4();
	let swarm_config = SwarmConfig {
		node_name: node_name.clone(),
		bind_addr: SocketAddr::from(([0, 0, 0, 0], config.swarm_port)),
		advertise_addr: Some(SocketAddr::from((local_ip, config.swarm_port))),
	};

	let swarm = match Swarm::create(swarm_config, delegate, cancel.child_token()).await {
		Ok(swarm) => swarm,
		Err(err) => {
			eprintln!("{} failed to start swarm: {err}", "error:".red().bold());
			return None;
		}
	};
	broadcasts.bind_num_nodes(swarm.member_count_fn());

	let mode = discovery::resolve_mode(config);
	let (peers, mdns) = match discovery::discover_peers(&mode, &node_name, config.swarm_port).await
	{
		Ok(result) => result,
		Err(err) => {
			warn!("peer discovery failed: {err}");
			(Vec::new(), None)
		}
	};

	if peers.is_empty() {
		info!("no peers discovered; operating solo");
	} else {
		let joined = swarm.join(&peers).await;
		info!(joined, discovered = peers.len(), "joined swarm peers");
	}

	Some(SwarmParts {
		swarm,
		broadcasts,
		mdns,
	})
}

fn swarm_node_name() -> String {
	let hostname = sysinfo::System::host_name().unwrap_or_else(|| "node".to_string());
	format!("{hostname}-{}", uuid::Uuid::new_v4().simple())
}

fn shutdown_swarm(parts: SwarmParts) {
	parts.swarm.shutdown();
	if let Some(mdns) = parts.mdns {
		mdns.shutdown();
	}
}

async fn cmd_index(directory: &Path, config: &Config, cancel: CancellationToken) -> ExitCode {
	let host_id = match host::host_id(config.host_id.as_deref()) {
		Ok(host_id) => host_id,
		Err(err) => return fatal(&format!("cannot determine host id: {err}")),
	};
	let store = match MetadataStore::open(&config.db_path()) {
		Ok(store) => Arc::new(store),
		Err(err) => return fatal(&format!("failed to open persistent store: {err}")),
	};
	let writer = Arc::new(CacheWriter::new(
		store.clone(),
		config.batch_size,
		Duration::from_millis(config.flush_interval_ms),
	));

	let mut swarm_parts = None;
	if config.swarm {
		match start_swarm(config, store.clone(), &cancel).await {
			Some(parts) => swarm_parts = Some(parts),
			None => return ExitCode::FAILURE,
		}
	}

	let sink = match &swarm_parts {
		Some(parts) => RecordSink::LocalAndBroadcast {
			writer: writer.clone(),
			broadcasts: parts.broadcasts.clone(),
		},
		None => RecordSink::LocalOnly(writer.clone()),
	};
	let processor = Arc::new(FileProcessor::new(host_id, sink, cancel.clone()));

	let (events_tx, events_rx) = flume::unbounded();
	let display = tokio::spawn(run_display(events_rx, config.quiet));

	let walker = Walker::new(processor, events_tx, cancel.clone(), config.workers);
	let result = walker.scan(directory).await;
	drop(walker);
	let _ = display.await;

	writer.close().await;
	if let Some(parts) = swarm_parts {
		shutdown_swarm(parts);
	}

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(ScanError::Cancelled) => {
			info!("scan cancelled; shut down cleanly");
			ExitCode::SUCCESS
		}
		Err(err) => fatal(&format!("error during directory processing: {err}")),
	}
}

async fn run_display(events: flume::Receiver<ScanEvent>, quiet: bool) {
	use std::io::Write;

	while let Ok(event) = events.recv_async().await {
		match event {
			ScanEvent::RootStarted { root } => {
				if !quiet {
					println!("{} {}", "Indexing".cyan().bold(), root.display());
				}
			}
			ScanEvent::SubdirStarted { index, total, path } => {
				if !quiet {
					println!(
						"{} ({index}/{total}): {}",
						"Processing directory".cyan(),
						path.display(),
					);
				}
			}
			ScanEvent::Progress {
				files_processed,
				files_total,
				..
			} => {
				if !quiet {
					print!("\r  {files_processed}/{files_total} files");
					let _ = std::io::stdout().flush();
					if files_processed == files_total {
						println!();
					}
				}
			}
			ScanEvent::FileFailed { path, error } => {
				eprintln!("{} {}: {error}", "error:".red().bold(), path.display());
			}
			ScanEvent::SubdirFailed { path, error } => {
				eprintln!(
					"{} reading {}: {error}",
					"error:".red().bold(),
					path.display(),
				);
			}
		}
	}
}

async fn cmd_serve(config: &Config, cancel: CancellationToken) -> ExitCode {
	let store = match MetadataStore::open(&config.db_path()) {
		Ok(store) => Arc::new(store),
		Err(err) => return fatal(&format!("failed to open persistent store: {err}")),
	};

	let mut swarm_parts = None;
	if config.swarm {
		match start_swarm(config, store.clone(), &cancel).await {
			Some(parts) => swarm_parts = Some(parts),
			None => return ExitCode::FAILURE,
		}
	}

	let registry = Arc::new(PeerRegistry::default());
	let router = server::router(store, registry, config.swarm_port);
	let listener = match tokio::net::TcpListener::bind(&config.addr).await {
		Ok(listener) => listener,
		Err(err) => return fatal(&format!("failed to bind {}: {err}", config.addr)),
	};
	if !config.quiet {
		println!(
			"{} {}",
			"Serving replication endpoints on".blue().bold(),
			config.addr,
		);
	}

	let result = server::serve(listener, router, cancel.clone()).await;
	if let Some(parts) = swarm_parts {
		shutdown_swarm(parts);
	}
	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => fatal(&format!("http server error: {err}")),
	}
}

fn cmd_dump(config: &Config, format: DumpFormat) -> ExitCode {
	let store = match MetadataStore::open(&config.db_path()) {
		Ok(store) => store,
		Err(err) => return fatal(&format!("failed to open persistent store: {err}")),
	};
	let records = match store.get_all() {
		Ok(records) => records,
		Err(err) => return fatal(&format!("failed to read metadata: {err}")),
	};

	match format {
		DumpFormat::Json => {
			let stdout = std::io::stdout();
			if let Err(err) = serde_json::to_writer_pretty(stdout.lock(), &records) {
				return fatal(&format!("failed to encode JSON: {err}"));
			}
			println!();
		}
		DumpFormat::Tsv => {
			println!("_id\tfilePath\tsize\tmodTime");
			for record in &records {
				println!(
					"{}\t{}\t{}\t{}",
					record.id, record.file_path, record.size, record.mod_time,
				);
			}
		}
	}
	ExitCode::SUCCESS
}
