pub mod keys;
pub mod list;
pub mod ping;
pub mod string;

use bytes::Bytes;
use std::collections::HashMap;
use std::{slice, str};
use thiserror::Error as ThisError;

use crate::db::Database;
use crate::frame::Frame;

/// Executes one command against a database. Receives the arguments without the command name.
pub type ExecFn = fn(&Database, &[Bytes]) -> Result<Frame, CommandError>;

/// Immutable description of a command: how to run it and how many arguments it takes.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub exec: ExecFn,
    /// Number of arguments, excluding the command name. `k >= 0` means exactly `k`, `-k` means
    /// at least `k`.
    pub arity: i32,
    /// Whether a successful execution has to be appended to the AOF.
    pub write: bool,
}

impl CommandSpec {
    pub fn accepts(&self, argc: usize) -> bool {
        validate_arity(self.arity, argc)
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("write", &self.write)
            .finish()
    }
}

pub fn validate_arity(arity: i32, argc: usize) -> bool {
    if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= arity.unsigned_abs() as usize
    }
}

/// Lookup table from lowercase command name to its spec.
///
/// Built once by [`CommandTable::new`], which asks every command family to register itself, and
/// never modified afterwards.
#[derive(Debug)]
pub struct CommandTable {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    pub fn new() -> CommandTable {
        let mut table = CommandTable {
            commands: HashMap::new(),
        };

        ping::register(&mut table);
        string::register(&mut table);
        keys::register(&mut table);
        list::register(&mut table);

        table
    }

    /// Registers a command that only reads.
    pub fn read(&mut self, name: &'static str, exec: ExecFn, arity: i32) {
        self.insert(name, exec, arity, false);
    }

    /// Registers a command whose effects are persisted.
    pub fn write(&mut self, name: &'static str, exec: ExecFn, arity: i32) {
        self.insert(name, exec, arity, true);
    }

    fn insert(&mut self, name: &'static str, exec: ExecFn, arity: i32, write: bool) {
        let spec = CommandSpec {
            name,
            exec,
            arity,
            write,
        };
        self.commands.insert(name, spec);
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors a command reports to the client. The display string is the exact error reply.
#[derive(Debug, ThisError, PartialEq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
    #[error("ERR invalid DB index")]
    InvalidDbIndex,
    #[error("ERR DB index is out of range")]
    DbIndexOutOfRange,
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("ERR empty command")]
    EmptyCommand,
    /// Anything that is not the client's fault. The detail is logged, never sent.
    #[error("ERR unknown")]
    Internal(String),
}

impl From<CommandError> for Frame {
    fn from(err: CommandError) -> Self {
        Frame::Error(err.to_string())
    }
}

/// Lowercase command name of a command line.
pub fn command_name(cmd_line: &[Bytes]) -> Result<String, CommandError> {
    let name = cmd_line.first().ok_or(CommandError::EmptyCommand)?;
    Ok(String::from_utf8_lossy(name).to_lowercase())
}

/// Sequential access to command arguments.
pub(crate) struct CommandParser<'a> {
    parts: slice::Iter<'a, Bytes>,
}

impl<'a> CommandParser<'a> {
    pub(crate) fn new(args: &'a [Bytes]) -> CommandParser<'a> {
        CommandParser { parts: args.iter() }
    }

    fn next_part(&mut self) -> Result<&'a Bytes, CommandError> {
        // Arity is validated before executors run, so running out of parts is a bug.
        self.parts
            .next()
            .ok_or_else(|| CommandError::Internal("command arguments exhausted".to_string()))
    }

    /// Keys are text. Invalid UTF-8 sequences are replaced rather than rejected.
    pub(crate) fn next_string(&mut self) -> Result<String, CommandError> {
        self.next_part()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub(crate) fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.next_part().cloned()
    }

    pub(crate) fn next_integer(&mut self) -> Result<i64, CommandError> {
        parse_integer(self.next_part()?)
    }

    pub(crate) fn remaining(&mut self) -> slice::Iter<'a, Bytes> {
        self.parts.clone()
    }
}

pub(crate) fn parse_integer(bytes: &[u8]) -> Result<i64, CommandError> {
    str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotAnInteger)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use super::*;
    use crate::frame::cmd_line;

    pub fn database() -> Database {
        Database::new(0, Arc::new(CommandTable::new()))
    }

    pub async fn exec(db: &Database, parts: &[&str]) -> Frame {
        match db.exec(&cmd_line(parts)).await {
            Ok(frame) => frame,
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_arity() {
        assert!(validate_arity(2, 2));
        assert!(!validate_arity(2, 1));
        assert!(!validate_arity(2, 3));
        assert!(validate_arity(0, 0));
        assert!(!validate_arity(0, 1));
    }

    #[test]
    fn minimum_arity() {
        assert!(validate_arity(-2, 2));
        assert!(validate_arity(-2, 10));
        assert!(!validate_arity(-2, 1));
        assert!(validate_arity(-1, 1));
        assert!(!validate_arity(-1, 0));
    }

    #[test]
    fn table_registers_every_family() {
        let table = CommandTable::new();

        for name in ["ping", "get", "set", "mset", "incrby", "del", "rename", "lpush"] {
            assert!(table.get(name).is_some(), "{} is not registered", name);
        }

        assert!(table.get("GET").is_none());
        assert!(table.get("select").is_none());
        assert!(table.get("set").unwrap().write);
        assert!(!table.get("get").unwrap().write);
    }

    #[test]
    fn command_name_is_lowercased() {
        let line = vec![Bytes::from("GeT"), Bytes::from("key")];
        assert_eq!(command_name(&line), Ok("get".to_string()));
        assert_eq!(command_name(&[]), Err(CommandError::EmptyCommand));
    }

    #[test]
    fn error_replies() {
        assert_eq!(
            Frame::from(CommandError::WrongArity("get".to_string())),
            Frame::Error("ERR wrong number of arguments for 'get' command".to_string())
        );
        assert_eq!(
            Frame::from(CommandError::Internal("boom".to_string())),
            Frame::Error("ERR unknown".to_string())
        );
    }
}
