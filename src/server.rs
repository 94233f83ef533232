use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::cluster::Cluster;
use crate::codec::RespCodec;
use crate::config::Config;
use crate::connection::{Client, Connection};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// What connections execute their commands against.
#[derive(Debug)]
pub enum Backend {
    Standalone(Store),
    Cluster(Cluster),
}

impl Backend {
    pub async fn open(config: &Config) -> crate::Result<Backend> {
        if config.is_cluster() {
            Ok(Backend::Cluster(Cluster::open(config).await?))
        } else {
            Ok(Backend::Standalone(Store::open(config).await?))
        }
    }

    pub async fn exec(&self, client: &mut impl Client, cmd_line: &[Bytes]) -> Frame {
        match self {
            Backend::Standalone(store) => store.exec(client, cmd_line).await,
            Backend::Cluster(cluster) => cluster.exec(client, cmd_line).await,
        }
    }

    pub async fn close(&self) {
        match self {
            Backend::Standalone(store) => store.close().await,
            Backend::Cluster(cluster) => cluster.close().await,
        }
    }
}

/// Listens on the configured address until Ctrl-C or SIGTERM is received.
pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind(config.listen_addr()).await?;

    serve(listener, config, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Accepts connections on `listener` until `shutdown` completes, then waits for the open
/// connections to finish and closes the backend.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    shutdown: impl Future,
) -> Result<(), Error> {
    let backend = Arc::new(Backend::open(&config).await?);

    // Dropping the sender tells every connection to stop. Each connection holds a clone of
    // `shutdown_complete_tx`, so `recv` returns once all of them are gone.
    let (notify_shutdown, _) = broadcast::channel::<()>(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    info!("Redis server listening on {}", listener.local_addr()?);

    tokio::select! {
        res = accept(&listener, &backend, &config, &notify_shutdown, &shutdown_complete_tx) => {
            if let Err(e) = res {
                error!("failed to accept connection: {}", e);
            }
        }
        _ = shutdown => info!("shutting down"),
    }

    drop(notify_shutdown);
    drop(shutdown_complete_tx);
    let _ = shutdown_complete_rx.recv().await;

    backend.close().await;
    info!("server stopped");

    Ok(())
}

async fn accept(
    listener: &TcpListener,
    backend: &Arc<Backend>,
    config: &Config,
    notify_shutdown: &broadcast::Sender<()>,
    shutdown_complete: &mpsc::Sender<()>,
) -> Result<(), Error> {
    loop {
        let (socket, client_address) = listener.accept().await?;
        info!("Accepted connection from {:?}", client_address);

        let backend = backend.clone();
        let codec = RespCodec::new(config.max_frame_size);
        let shutdown = notify_shutdown.subscribe();
        let done = shutdown_complete.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, codec, backend, shutdown).await {
                error!("connection failed: {}", e);
            }
            drop(done);
        });
    }
}

#[instrument(
    name = "connection",
    skip(stream, codec, backend, shutdown),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    codec: RespCodec,
    backend: Arc<Backend>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Error> {
    let mut conn = Connection::with_codec(stream, codec);

    let span = tracing::Span::current();
    span.record("connection_id", conn.id.to_string());
    if let Some(addr) = conn.addr {
        span.record("client_address", addr.to_string());
    }

    loop {
        let item = tokio::select! {
            res = conn.read_frame() => res?,
            _ = shutdown.recv() => break,
        };

        // The client closed the connection.
        let Some(item) = item else {
            break;
        };

        let res = match item {
            Ok(frame) => {
                debug!("Received frame from client: {:?}", frame);
                match frame.into_cmd_line() {
                    Some(cmd_line) => backend.exec(&mut conn, &cmd_line).await,
                    None => {
                        warn!("frame is not a command");
                        Frame::Error(
                            "ERR Protocol error: expected an array of bulk strings".to_string(),
                        )
                    }
                }
            }
            Err(e) => {
                warn!("protocol error: {}", e);
                Frame::Error(format!("ERR Protocol error: {}", e))
            }
        };

        debug!("Sending response to client: {:?}", res);
        conn.write_frame(&res).await?;
    }

    conn.close().await;
    info!("Connection closed");
    Ok(())
}
