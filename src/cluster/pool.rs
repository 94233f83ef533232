use bytes::Bytes;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::timeout;
use tracing::debug;

use crate::cluster::client::PeerClient;
use crate::cluster::ClusterError;
use crate::frame::Frame;

/// Connections to one peer.
///
/// At most `max_active` clients are borrowed at a time and at most `max_idle` are kept around
/// once returned. Clients are created lazily.
#[derive(Debug)]
pub struct PeerPool {
    addr: String,
    permits: Semaphore,
    idle: Mutex<Vec<PeerClient>>,
    max_idle: usize,
    timeout: Duration,
}

impl PeerPool {
    /// `timeout` bounds both the wait for a free slot and every request sent by the clients.
    pub fn new(
        addr: impl Into<String>,
        max_active: usize,
        max_idle: usize,
        timeout: Duration,
    ) -> PeerPool {
        PeerPool {
            addr: addr.into(),
            permits: Semaphore::new(max_active),
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of connected clients waiting to be borrowed.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map_or(0, |idle| idle.len())
    }

    /// Borrows a client, connecting a new one when none is idle. The client goes back to the
    /// pool when the guard is dropped.
    pub async fn borrow(&self) -> Result<PooledClient<'_>, ClusterError> {
        let permit = match timeout(self.timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ClusterError::Closed),
            Err(_) => return Err(ClusterError::PoolExhausted(self.addr.clone())),
        };

        let idle = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let client = match idle {
            Some(client) => client,
            None => PeerClient::connect(&self.addr, self.timeout).await?,
        };

        Ok(PooledClient {
            pool: self,
            client: Some(client),
            _permit: permit,
        })
    }

    fn give_back(&self, client: PeerClient) {
        if client.is_broken() {
            debug!(peer = %self.addr, "dropping broken peer connection");
            return;
        }

        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(client);
            }
        }
    }
}

/// A client borrowed from a [`PeerPool`].
#[derive(Debug)]
pub struct PooledClient<'a> {
    pool: &'a PeerPool,
    client: Option<PeerClient>,
    // Released after `drop` put the client back.
    _permit: SemaphorePermit<'a>,
}

impl PooledClient<'_> {
    pub async fn send(&mut self, cmd_line: &[Bytes]) -> Result<Frame, ClusterError> {
        match self.client.as_mut() {
            Some(client) => client.send(cmd_line).await,
            None => Err(ClusterError::Closed),
        }
    }
}

impl Drop for PooledClient<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.give_back(client);
        }
    }
}
