//! Append-only file persistence.
//!
//! Write commands are queued by the databases and written by a single background task, so the
//! file holds them in the order they were applied. Every record is a RESP array of bulk strings;
//! a `SELECT <index>` record is inserted whenever the database index changes.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{CodecError, RespCodec};
use crate::connection::ReplayClient;
use crate::frame::{cmd_line, CmdLine};
use crate::store::Store;

/// Maximum number of records waiting to be written. Producers wait when it is reached.
const QUEUE_CAPACITY: usize = 1 << 16;

/// When the file is synced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AppendFsync {
    /// After every record.
    Always,
    /// At most once per second.
    #[default]
    Everysec,
    /// Left to the operating system.
    No,
}

#[derive(Debug)]
struct Record {
    db_index: usize,
    cmd_line: CmdLine,
}

/// Producer side of the log, shared by every database.
#[derive(Debug, Clone)]
pub struct AofHandle {
    tx: mpsc::Sender<Record>,
}

impl AofHandle {
    /// Queues a command executed against database `db_index`. Waits while the queue is full.
    pub async fn append(&self, db_index: usize, cmd_line: CmdLine) {
        let record = Record { db_index, cmd_line };
        if self.tx.send(record).await.is_err() {
            warn!(db = db_index, "aof writer is closed, command not persisted");
        }
    }
}

/// Owner of the background task writing the log.
#[derive(Debug)]
pub struct AofWriter {
    path: PathBuf,
    handle: AofHandle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AofWriter {
    /// Opens `path` for appending, creating it when missing, and starts the writer task.
    pub async fn spawn(path: impl AsRef<Path>, fsync: AppendFsync) -> io::Result<AofWriter> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let sync_handle = file.try_clone().await?;
        let log = AofFile::new(file, Some(sync_handle), fsync);
        let task = tokio::spawn(write_records(log, rx, shutdown_rx));

        info!(path = %path.display(), ?fsync, "aof enabled");

        Ok(AofWriter {
            path,
            handle: AofHandle { tx },
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn handle(&self) -> AofHandle {
        self.handle.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting records, writes everything still queued and syncs the file.
    pub async fn close(&self) {
        let shutdown = self.shutdown.lock().ok().and_then(|mut tx| tx.take());
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("aof writer task failed: {}", e);
            }
        }
    }
}

struct AofFile<W> {
    sink: FramedWrite<W, RespCodec>,
    // Handle used for `sync_data`. `None` when the sink is not a file.
    file: Option<File>,
    // Database the records written last apply to. Replay starts at database 0.
    current_db: usize,
    fsync: AppendFsync,
    // Written but not synced yet.
    dirty: bool,
}

impl<W: AsyncWrite + Unpin> AofFile<W> {
    fn new(sink: W, file: Option<File>, fsync: AppendFsync) -> AofFile<W> {
        AofFile {
            sink: FramedWrite::new(sink, RespCodec::default()),
            file,
            current_db: 0,
            fsync,
            dirty: false,
        }
    }

    async fn write(&mut self, record: Record) {
        if record.db_index != self.current_db {
            let select = cmd_line(&["SELECT", &record.db_index.to_string()]);
            if let Err(e) = self.send(&select).await {
                warn!(db = record.db_index, "failed to write select to aof: {}", e);
                return;
            }
            self.current_db = record.db_index;
        }

        if let Err(e) = self.send(&record.cmd_line).await {
            warn!(db = record.db_index, "failed to write command to aof: {}", e);
            return;
        }
        self.dirty = true;

        if self.fsync == AppendFsync::Always {
            self.sync().await;
        }
    }

    async fn send(&mut self, cmd_line: &[Bytes]) -> Result<(), CodecError> {
        let res = self.sink.send(cmd_line).await;
        if res.is_err() {
            // A failed record must not be written ahead of the next one.
            self.sink.write_buffer_mut().clear();
        }
        res
    }

    async fn sync(&mut self) {
        if !self.dirty {
            return;
        }

        let Some(file) = &self.file else {
            self.dirty = false;
            return;
        };

        match file.sync_data().await {
            Ok(()) => self.dirty = false,
            Err(e) => warn!("failed to sync aof: {}", e),
        }
    }
}

async fn write_records<W: AsyncWrite + Unpin>(
    mut log: AofFile<W>,
    mut rx: mpsc::Receiver<Record>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let periodic_sync = log.fsync == AppendFsync::Everysec;

    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => log.write(record).await,
                None => break,
            },
            _ = &mut shutdown => break,
            _ = ticker.tick(), if periodic_sync => log.sync().await,
        }
    }

    rx.close();
    while let Some(record) = rx.recv().await {
        log.write(record).await;
    }

    // Every record is flushed as it is sent, only the sync is pending.
    if log.fsync != AppendFsync::No {
        log.sync().await;
    }

    debug!("aof writer stopped");
}

/// Replays the log at `path` into `store`, returning how many commands were executed.
///
/// Must run before the writer is attached so replayed commands are not logged again. A missing
/// file means there is nothing to replay. Malformed records are skipped, so a partially written
/// last record does not prevent loading the ones before it.
pub async fn load(path: impl AsRef<Path>, store: &Store) -> io::Result<usize> {
    let path = path.as_ref();
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no aof to replay");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut frames = FramedRead::new(file, RespCodec::default());
    let mut client = ReplayClient::new();
    let mut replayed = 0;

    while let Some(item) = frames.next().await {
        let frame = match item {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!("skipping malformed aof record: {}", e);
                continue;
            }
            Err(e) => {
                error!("failed to read aof: {}", e);
                break;
            }
        };

        let Some(cmd_line) = frame.clone().into_cmd_line() else {
            warn!("skipping aof record that is not a command: {}", frame);
            continue;
        };

        let res = store.exec(&mut client, &cmd_line).await;
        if res.is_error() {
            warn!("replayed command failed: {}", res);
        }
        replayed += 1;
    }

    info!(path = %path.display(), replayed, "aof loaded");
    Ok(replayed)
}
