use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::cluster::{peer_handshake, ClusterError};
use crate::codec::RespCodec;
use crate::frame::Frame;

/// Connection to another node of the cluster. Sends one command at a time and waits for its
/// reply.
#[derive(Debug)]
pub struct PeerClient {
    addr: String,
    reader: FramedRead<OwnedReadHalf, RespCodec>,
    writer: FramedWrite<OwnedWriteHalf, RespCodec>,
    timeout: Duration,
    // Set once the stream can no longer be trusted to be at a reply boundary.
    broken: bool,
    // Whether the peer knows this connection comes from another node.
    introduced: bool,
}

impl PeerClient {
    pub async fn connect(
        addr: &str,
        request_timeout: Duration,
    ) -> Result<PeerClient, ClusterError> {
        let stream = timeout(request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClusterError::Timeout)?
            .map_err(|source| ClusterError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| ClusterError::Connect {
            addr: addr.to_string(),
            source,
        })?;

        debug!(peer = addr, "connected to peer");

        let (reader, writer) = stream.into_split();
        Ok(PeerClient {
            addr: addr.to_string(),
            reader: FramedRead::new(reader, RespCodec::default()),
            writer: FramedWrite::new(writer, RespCodec::default()),
            timeout: request_timeout,
            broken: false,
            introduced: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends a command line and returns the peer's reply. Any failure leaves the client broken.
    pub async fn send(&mut self, cmd_line: &[Bytes]) -> Result<Frame, ClusterError> {
        if self.broken {
            return Err(ClusterError::Closed);
        }

        let res = match timeout(self.timeout, self.round_trip(cmd_line)).await {
            Ok(res) => res,
            Err(_) => Err(ClusterError::Timeout),
        };

        if res.is_err() {
            self.broken = true;
        }
        res
    }

    async fn round_trip(&mut self, cmd_line: &[Bytes]) -> Result<Frame, ClusterError> {
        if !self.introduced {
            if let Frame::Error(msg) = self.request(&peer_handshake()).await? {
                return Err(ClusterError::Handshake(msg));
            }
            self.introduced = true;
        }

        self.request(cmd_line).await
    }

    async fn request(&mut self, cmd_line: &[Bytes]) -> Result<Frame, ClusterError> {
        self.writer.send(cmd_line).await?;

        match self.reader.next().await {
            Some(Ok(Ok(frame))) => Ok(frame),
            Some(Ok(Err(e))) => Err(ClusterError::Protocol(e)),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClusterError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::cmd_line;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_util::codec::Framed;

    /// Answers every frame with `+OK` and forwards what it received.
    async fn recording_server() -> (String, mpsc::UnboundedReceiver<Frame>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, RespCodec::default());
            while let Some(Ok(Ok(frame))) = framed.next().await {
                let _ = tx.send(frame);
                if framed.send(Frame::ok()).await.is_err() {
                    break;
                }
            }
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn introduces_itself_once() {
        let (addr, mut received) = recording_server().await;
        let mut client = PeerClient::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(client.send(&cmd_line(&["GET", "a"])).await.unwrap(), Frame::ok());
        assert_eq!(client.send(&cmd_line(&["GET", "b"])).await.unwrap(), Frame::ok());

        assert_eq!(
            received.recv().await,
            Some(Frame::from_cmd_line(&cmd_line(&["CLIENT", "PEER"])))
        );
        assert_eq!(
            received.recv().await,
            Some(Frame::from_cmd_line(&cmd_line(&["GET", "a"])))
        );
        assert_eq!(
            received.recv().await,
            Some(Frame::from_cmd_line(&cmd_line(&["GET", "b"])))
        );
        assert!(!client.is_broken());
    }
}
