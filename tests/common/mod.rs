#![allow(dead_code)]

use redis::aio::MultiplexedConnection;
use shardis::config::Config;
use shardis::server::serve;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running in the background of the test runtime.
pub struct TestServer {
    pub addr: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn connect(&self) -> MultiplexedConnection {
        let client = redis::Client::open(format!("redis://{}/", self.addr)).unwrap();
        client.get_multiplexed_async_connection().await.unwrap()
    }

    /// Stops the server and waits until it has shut down.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap();
    }
}

pub async fn bind() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

pub fn spawn(listener: TcpListener, config: Config) -> TestServer {
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        serve(listener, config, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestServer {
        addr,
        shutdown,
        handle,
    }
}

pub async fn start(config: Config) -> TestServer {
    spawn(bind().await, config)
}
