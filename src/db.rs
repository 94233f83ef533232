use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::aof::AofHandle;
use crate::commands::{command_name, CommandError, CommandTable};
use crate::dict::{Dict, Entity};
use crate::frame::Frame;

/// One logical database: an index and the entities stored under it.
#[derive(Debug)]
pub struct Database {
    index: usize,
    dict: Dict,
    commands: Arc<CommandTable>,
    // Where write commands are logged. `None` while persistence is disabled or the log is
    // being replayed.
    aof: Option<AofHandle>,
    // Held from applying a logged write until it is queued, so the log keeps the apply order.
    log_order: Mutex<()>,
}

impl Database {
    pub fn new(index: usize, commands: Arc<CommandTable>) -> Database {
        Database {
            index,
            dict: Dict::new(),
            commands,
            aof: None,
            log_order: Mutex::new(()),
        }
    }

    pub(crate) fn attach_aof(&mut self, aof: AofHandle) {
        self.aof = Some(aof);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    /// Runs a command line (name included) against this database.
    pub async fn exec(&self, cmd_line: &[Bytes]) -> Result<Frame, CommandError> {
        let name = command_name(cmd_line)?;
        let spec = self
            .commands
            .get(&name)
            .ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;

        let args = &cmd_line[1..];
        if !spec.accepts(args.len()) {
            return Err(CommandError::WrongArity(name));
        }

        match &self.aof {
            Some(aof) if spec.write => {
                let _order = self.log_order.lock().await;
                let res = (spec.exec)(self, args)?;

                debug!(db = self.index, "appending command to aof");
                aof.append(self.index, cmd_line.to_vec()).await;
                Ok(res)
            }
            _ => (spec.exec)(self, args),
        }
    }

    /// String value stored at `key`, `None` if absent.
    pub fn get_string(&self, key: &str) -> Result<Option<Bytes>, CommandError> {
        match self.dict.get(key) {
            None => Ok(None),
            Some(Entity::String(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn put_string(&self, key: String, value: Bytes) -> usize {
        self.dict.put(key, Entity::String(value))
    }

    /// Removes the given keys, returning how many existed.
    pub fn remove_keys<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> i64 {
        keys.into_iter()
            .filter(|key| self.dict.remove(key).is_some())
            .count() as i64
    }

    pub fn flush(&self) {
        self.dict.clear();
    }
}
