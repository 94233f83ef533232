use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tracing::warn;
use uuid::Uuid;

use crate::codec::{CodecError, ProtocolError, RespCodec};
use crate::frame::Frame;

/// Per-client state the engine needs while executing a command.
pub trait Client: Send {
    /// Index of the currently selected database.
    fn db_index(&self) -> usize;

    fn select_db(&mut self, index: usize);

    /// Whether the client is another cluster node relaying commands it already routed.
    fn is_peer(&self) -> bool;

    fn mark_peer(&mut self);
}

/// A client connection.
pub struct Connection {
    pub id: Uuid,
    pub addr: Option<SocketAddr>,
    // Data is read from the socket and decoded frame by frame. Partially received frames stay
    // buffered inside the codec.
    frames: FramedRead<OwnedReadHalf, RespCodec>,
    // Replies are written under the lock so they never interleave.
    writer: Mutex<OwnedWriteHalf>,
    db_index: usize,
    peer: bool,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection::with_codec(stream, RespCodec::default())
    }

    pub fn with_codec(stream: TcpStream, codec: RespCodec) -> Connection {
        let addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            addr,
            frames: FramedRead::new(reader, codec),
            writer: Mutex::new(writer),
            db_index: 0,
            peer: false,
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `None` once the peer closed the socket. A malformed frame is returned as the inner
    /// error and the connection remains usable.
    pub async fn read_frame(&mut self) -> Result<Option<Result<Frame, ProtocolError>>, CodecError> {
        self.frames.next().await.transpose()
    }

    pub async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(data).await
    }

    pub async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        self.write(&frame.serialize()).await
    }

    /// Shuts the socket down.
    ///
    /// Replies are written to completion before the next frame is read, so no write is pending
    /// when the connection is closed.
    pub async fn close(self) {
        let mut writer = self.writer.into_inner();
        if let Err(e) = writer.shutdown().await {
            warn!(connection_id = %self.id, "failed to shut down connection: {}", e);
        }
    }
}

impl Client for Connection {
    fn db_index(&self) -> usize {
        self.db_index
    }

    fn select_db(&mut self, index: usize) {
        self.db_index = index;
    }

    fn is_peer(&self) -> bool {
        self.peer
    }

    fn mark_peer(&mut self) {
        self.peer = true;
    }
}

/// A client without a socket, used while replaying the AOF. Only tracks the selected database.
#[derive(Debug, Default)]
pub struct ReplayClient {
    db_index: usize,
    peer: bool,
}

impl ReplayClient {
    pub fn new() -> ReplayClient {
        ReplayClient::default()
    }
}

impl Client for ReplayClient {
    fn db_index(&self) -> usize {
        self.db_index
    }

    fn select_db(&mut self, index: usize) {
        self.db_index = index;
    }

    fn is_peer(&self) -> bool {
        self.peer
    }

    fn mark_peer(&mut self) {
        self.peer = true;
    }
}
