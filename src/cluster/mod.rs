//! Cluster mode: keys are sharded across a static set of nodes with a consistent hash ring.
//!
//! Every node accepts any command. Commands on a single key are relayed to the node owning it,
//! key-space commands are broadcast to all nodes and their replies merged.

pub mod client;
pub mod pool;
pub mod ring;
pub mod router;

use bytes::Bytes;
use itertools::Itertools;
use std::collections::HashMap;
use std::io;
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

use crate::codec::{CodecError, ProtocolError};
use crate::commands::{command_name, CommandError};
use crate::config::Config;
use crate::connection::Client;
use crate::frame::{cmd_line, CmdLine, Frame};
use crate::store::Store;

use self::pool::PeerPool;
use self::ring::HashRing;
use self::router::{aggregate, make_router, Route, Router};

#[derive(Debug, ThisError)]
pub enum ClusterError {
    #[error("unknown peer '{0}'")]
    UnknownPeer(String),
    #[error("connection pool of '{0}' exhausted")]
    PoolExhausted(String),
    #[error("failed to connect to '{addr}': {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] CodecError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("rename across nodes is not supported")]
    CrossNodeRename,
    #[error("peer rejected handshake: {0}")]
    Handshake(String),
}

impl From<ClusterError> for Frame {
    fn from(err: ClusterError) -> Self {
        Frame::Error(format!("ERR {}", err))
    }
}

/// A node of the cluster: the local store plus a connection pool per peer.
#[derive(Debug)]
pub struct Cluster {
    self_addr: String,
    // Every node, this one included.
    nodes: Vec<String>,
    ring: HashRing,
    pools: HashMap<String, PeerPool>,
    store: Store,
    router: Router,
}

impl Cluster {
    /// Joins the local `store` to the nodes listed in `config`.
    pub fn new(config: &Config, store: Store) -> Cluster {
        let self_addr = config.self_addr.clone().unwrap_or_default();

        let mut nodes: Vec<String> = config
            .peers
            .iter()
            .filter(|peer| !peer.is_empty() && **peer != self_addr)
            .unique()
            .cloned()
            .collect();

        let pools = nodes
            .iter()
            .map(|peer| {
                let pool = PeerPool::new(
                    peer.clone(),
                    config.peer_max_active,
                    config.peer_max_idle,
                    config.peer_timeout(),
                );
                (peer.clone(), pool)
            })
            .collect();

        nodes.push(self_addr.clone());

        info!(node = %self_addr, peers = ?config.peers, "cluster mode enabled");

        Cluster {
            ring: HashRing::new(nodes.iter().cloned()),
            self_addr,
            nodes,
            pools,
            store,
            router: make_router(),
        }
    }

    pub async fn open(config: &Config) -> crate::Result<Cluster> {
        let store = Store::open(config).await?;
        Ok(Cluster::new(config, store))
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Node owning `key`.
    pub fn owner(&self, key: &[u8]) -> &str {
        self.ring
            .pick_node(&String::from_utf8_lossy(key))
            .unwrap_or(self.self_addr.as_str())
    }

    pub async fn exec(&self, client: &mut impl Client, cmd_line: &[Bytes]) -> Frame {
        if client.is_peer() {
            // Already routed by the node that relayed it.
            return self.store.exec(client, cmd_line).await;
        }

        let name = match command_name(cmd_line) {
            Ok(name) => name,
            Err(e) => return e.into(),
        };

        if is_peer_handshake(cmd_line) {
            debug!("connection marked as peer");
            client.mark_peer();
            return Frame::ok();
        }

        let Some(route) = self.router.get(name.as_str()).copied() else {
            return Frame::Error(format!(
                "ERR unknown command '{}', or not supported in cluster mode",
                name
            ));
        };

        match route {
            Route::Local => self.store.exec(client, cmd_line).await,
            Route::ByKey => {
                let Some(key) = cmd_line.get(1) else {
                    return CommandError::WrongArity(name).into();
                };
                let node = self.owner(key);
                self.relay(node, client, cmd_line).await
            }
            Route::SameOwner => {
                let [_, src, dst] = cmd_line else {
                    return CommandError::WrongArity(name).into();
                };
                let node = self.owner(src);
                if node != self.owner(dst) {
                    return ClusterError::CrossNodeRename.into();
                }
                self.relay(node, client, cmd_line).await
            }
            Route::Broadcast(how) => aggregate(how, self.broadcast(client, cmd_line).await),
        }
    }

    /// Executes the command on `node`, in the database the client has selected.
    pub async fn relay(&self, node: &str, client: &mut impl Client, cmd_line: &[Bytes]) -> Frame {
        if node == self.self_addr {
            return self.store.exec(client, cmd_line).await;
        }

        debug!(peer = node, "relaying command");
        match self.relay_to_peer(node, client.db_index(), cmd_line).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = node, "relay failed: {}", e);
                e.into()
            }
        }
    }

    async fn relay_to_peer(
        &self,
        node: &str,
        db_index: usize,
        cmd_line: &[Bytes],
    ) -> Result<Frame, ClusterError> {
        let pool = self
            .pools
            .get(node)
            .ok_or_else(|| ClusterError::UnknownPeer(node.to_string()))?;
        let mut peer = pool.borrow().await?;

        let select = peer.send(&select_command(db_index)).await?;
        if select.is_error() {
            return Ok(select);
        }

        peer.send(cmd_line).await
    }

    /// Executes the command on every node, this one included.
    pub async fn broadcast(
        &self,
        client: &mut impl Client,
        cmd_line: &[Bytes],
    ) -> HashMap<String, Frame> {
        let mut replies = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let reply = self.relay(node, client, cmd_line).await;
            replies.insert(node.clone(), reply);
        }
        replies
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

fn select_command(db_index: usize) -> CmdLine {
    cmd_line(&["SELECT", &db_index.to_string()])
}

/// Sent by a node on every new peer connection, before the first relayed command.
pub(crate) fn peer_handshake() -> CmdLine {
    cmd_line(&["CLIENT", "PEER"])
}

fn is_peer_handshake(cmd_line: &[Bytes]) -> bool {
    match cmd_line {
        [name, arg] => name.eq_ignore_ascii_case(b"client") && arg.eq_ignore_ascii_case(b"peer"),
        _ => false,
    }
}
