use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::aof::AppendFsync;
use crate::codec::DEFAULT_MAX_FRAME_SIZE;

pub const PORT: u16 = 6379;
pub const DATABASES: usize = 16;

/// Server configuration. Every option can also be set through its environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "shardis", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "SHARDIS_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// The port to listen on
    #[arg(short, long, env = "SHARDIS_PORT", default_value_t = PORT)]
    pub port: u16,

    /// Number of databases
    #[arg(
        long,
        env = "SHARDIS_DATABASES",
        default_value_t = DATABASES,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub databases: usize,

    /// Log write commands to the append-only file and replay it on startup
    #[arg(long, env = "SHARDIS_APPENDONLY")]
    pub appendonly: bool,

    #[arg(long, env = "SHARDIS_APPENDFILENAME", default_value = "appendonly.aof")]
    pub appendfilename: PathBuf,

    /// When the append-only file is synced to disk
    #[arg(long, env = "SHARDIS_APPENDFSYNC", value_enum, default_value_t = AppendFsync::Everysec)]
    pub appendfsync: AppendFsync,

    /// Address of this node in the cluster, as listed by its peers. Enables cluster mode.
    #[arg(long = "self", env = "SHARDIS_SELF")]
    pub self_addr: Option<String>,

    /// Addresses of the other cluster nodes
    #[arg(long, env = "SHARDIS_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Maximum number of connections borrowed from each peer pool at once
    #[arg(long, default_value_t = 16)]
    pub peer_max_active: usize,

    /// Maximum number of idle connections kept per peer
    #[arg(long, default_value_t = 8)]
    pub peer_max_idle: usize,

    /// Timeout for borrowing a peer connection and for each peer request, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub peer_timeout_ms: u64,

    /// Largest accepted bulk payload or line, in bytes
    #[arg(long, env = "SHARDIS_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

impl Config {
    pub fn is_cluster(&self) -> bool {
        self.self_addr.is_some()
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn listen_addr(&self) -> (&str, u16) {
        (self.bind.as_str(), self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: PORT,
            databases: DATABASES,
            appendonly: false,
            appendfilename: PathBuf::from("appendonly.aof"),
            appendfsync: AppendFsync::default(),
            self_addr: None,
            peers: vec![],
            peer_max_active: 16,
            peer_max_idle: 8,
            peer_timeout_ms: 5000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
