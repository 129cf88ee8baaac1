use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use shardgraph::config::NodeConfig;
use shardgraph::engine::Engine;
use shardgraph::logging::init_logging;
use shardgraph::partition::{HttpPeerClient, PartitionCoordinator, PartitionMap};
use shardgraph::primitives::io::StdFileIo;
use shardgraph::server::{self, ServerOptions};
use shardgraph::storage::{StorageLayout, Synchronous};
use shardgraph::types::PartitionId;

#[derive(Parser, Debug)]
#[command(
    name = "graphd",
    version,
    about = "Serve one partition of a three-way partitioned graph store"
)]
struct Cli {
    #[arg(long, help = "Reinitialise storage to an empty graph before serving")]
    format: bool,

    #[arg(
        short = 'p',
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u8).range(1..=3),
        help = "Partition number served by this process (1, 2 or 3)"
    )]
    partition: u8,

    #[arg(
        short = 's',
        long,
        value_name = "FILE",
        env = "SHARDGRAPH_STORAGE",
        help = "Storage file; falls back to storage.path from the config"
    )]
    storage: Option<PathBuf>,

    #[arg(
        long,
        value_name = "ADDR",
        default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        help = "Interface both listeners bind to"
    )]
    host: IpAddr,

    #[arg(
        long,
        value_name = "ADDR",
        help = "Peer RPC listen address [default: <host>:<PORT + 1>]"
    )]
    rpc_addr: Option<SocketAddr>,

    #[arg(long, value_name = "FILE", env = "SHARDGRAPH_CONFIG", help = "Config file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Sync policy for log appends and checkpoints")]
    synchronous: Option<SynchronousArg>,

    #[arg(long, value_name = "BLOCKS", help = "Log capacity in 4096-byte blocks")]
    log_blocks: Option<u32>,

    #[arg(long, value_name = "SECS", help = "Automatic checkpoint period; 0 disables")]
    checkpoint_interval_secs: Option<u64>,

    #[arg(long, value_name = "MS", help = "Deadline for peer calls; 0 waits indefinitely")]
    rpc_timeout_ms: Option<u64>,

    #[arg(long, value_name = "FILTER", help = "Log filter used when RUST_LOG is unset")]
    log_level: Option<String>,

    #[arg(value_name = "PORT", help = "API listen port")]
    port: u16,

    #[arg(
        value_name = "PEER",
        num_args = 2,
        required = true,
        help = "RPC addresses of the other two partitions, lowest partition number first"
    )]
    peers: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SynchronousArg {
    Full,
    Normal,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(mode: SynchronousArg) -> Self {
        match mode {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Normal => Synchronous::Normal,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    init_logging(config.log.level.as_deref());

    let mut options = config.storage_options()?;
    if let Some(mode) = cli.synchronous {
        options = options.synchronous(mode.into());
    }
    if let Some(blocks) = cli.log_blocks {
        options = options.layout(StorageLayout::new(
            blocks,
            options.layout.checkpoint_slot_bytes(),
        )?);
    }
    let storage = config
        .storage
        .path
        .clone()
        .ok_or("no storage file given; pass --storage or set storage.path")?;

    let map = PartitionMap::new(PartitionId(cli.partition))?;
    let peers = map.peers().into_iter().zip(cli.peers.iter().cloned()).collect();
    // Built before the tokio runtime exists.
    let client = HttpPeerClient::new(peers, config.rpc_timeout())?;

    let io = Arc::new(StdFileIo::open(&storage)?);
    let (engine, report) = if cli.format {
        Engine::format(io, &options)?
    } else {
        Engine::open(io, &options)?
    };
    tracing::info!(
        storage = %storage.display(),
        partition = cli.partition,
        formatted = report.formatted,
        generation = report.generation,
        entries_replayed = report.entries_replayed,
        synchronous = options.synchronous.as_str(),
        "storage ready"
    );
    let coordinator = Arc::new(PartitionCoordinator::new(map, engine, Arc::new(client)));

    let rpc_addr = match cli.rpc_addr {
        Some(addr) => addr,
        None => {
            let port = cli
                .port
                .checked_add(1)
                .ok_or("API port leaves no room for the default RPC port; pass --rpc-addr")?;
            SocketAddr::new(cli.host, port)
        }
    };
    let server_options = ServerOptions {
        api_addr: SocketAddr::new(cli.host, cli.port),
        rpc_addr,
        checkpoint_interval: config.checkpoint_interval(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(server::serve(coordinator.clone(), server_options));
    // The blocking peer client must not be dropped inside the runtime.
    drop(runtime);
    drop(coordinator);
    result?;
    Ok(())
}

fn apply_overrides(config: &mut NodeConfig, cli: &Cli) {
    if let Some(path) = &cli.storage {
        config.storage.path = Some(path.clone());
    }
    if let Some(secs) = cli.checkpoint_interval_secs {
        config.server.checkpoint_interval_secs = Some(secs);
    }
    if let Some(ms) = cli.rpc_timeout_ms {
        config.server.rpc_timeout_ms = Some(ms);
    }
    if let Some(level) = &cli.log_level {
        config.log.level = Some(level.clone());
    }
}
