use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aof::{self, AofWriter};
use crate::commands::{command_name, parse_integer, CommandError, CommandTable};
use crate::config::Config;
use crate::connection::Client;
use crate::db::Database;
use crate::frame::Frame;

/// The standalone engine: a fixed set of numbered databases sharing one command table, plus the
/// AOF writer when persistence is enabled.
///
/// Executing a command never fails: every error ends up as an error reply.
#[derive(Debug)]
pub struct Store {
    databases: Vec<Database>,
    aof: Option<AofWriter>,
}

impl Store {
    /// Creates `databases` empty databases without persistence.
    pub fn new(databases: usize) -> Store {
        let commands = Arc::new(CommandTable::new());
        let databases = (0..databases)
            .map(|index| Database::new(index, commands.clone()))
            .collect();

        Store {
            databases,
            aof: None,
        }
    }

    /// Creates the store described by `config`. With persistence enabled, the existing log is
    /// replayed first and the writer is attached afterwards.
    pub async fn open(config: &Config) -> crate::Result<Store> {
        let mut store = Store::new(config.databases);

        if config.appendonly {
            aof::load(&config.appendfilename, &store).await?;

            let writer = AofWriter::spawn(&config.appendfilename, config.appendfsync).await?;
            for db in store.databases.iter_mut() {
                db.attach_aof(writer.handle());
            }
            store.aof = Some(writer);
        }

        info!(databases = store.len(), "store ready");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn database(&self, index: usize) -> Option<&Database> {
        self.databases.get(index)
    }

    /// Executes a command line on behalf of `client`.
    pub async fn exec(&self, client: &mut impl Client, cmd_line: &[Bytes]) -> Frame {
        match self.try_exec(client, cmd_line).await {
            Ok(frame) => frame,
            Err(CommandError::Internal(detail)) => {
                warn!(db = client.db_index(), "command failed: {}", detail);
                CommandError::Internal(detail).into()
            }
            Err(e) => e.into(),
        }
    }

    async fn try_exec(
        &self,
        client: &mut impl Client,
        cmd_line: &[Bytes],
    ) -> Result<Frame, CommandError> {
        let name = command_name(cmd_line)?;

        if name == "select" {
            return self.select(client, &cmd_line[1..]);
        }

        let db = self.databases.get(client.db_index()).ok_or_else(|| {
            CommandError::Internal(format!("selected db {} does not exist", client.db_index()))
        })?;

        db.exec(cmd_line).await
    }

    /// Changes the database the client's commands run against.
    ///
    /// Ref: <https://redis.io/docs/latest/commands/select/>
    fn select(&self, client: &mut impl Client, args: &[Bytes]) -> Result<Frame, CommandError> {
        let [index] = args else {
            return Err(CommandError::WrongArity("select".to_string()));
        };

        let index = parse_integer(index).map_err(|_| CommandError::InvalidDbIndex)?;
        let index = usize::try_from(index)
            .ok()
            .filter(|index| *index < self.databases.len())
            .ok_or(CommandError::DbIndexOutOfRange)?;

        client.select_db(index);
        Ok(Frame::ok())
    }

    /// Waits for pending writes to reach the log.
    pub async fn close(&self) {
        if let Some(aof) = &self.aof {
            aof.close().await;
            info!(path = %aof.path().display(), "aof closed");
        }
    }
}
