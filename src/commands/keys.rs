use bytes::Bytes;
use glob_match::glob_match;

use crate::commands::{CommandError, CommandParser, CommandTable};
use crate::db::Database;
use crate::frame::Frame;

pub(crate) fn register(table: &mut CommandTable) {
    table.write("del", del, -1);
    table.read("exists", exists, -1);
    table.read("type", type_, 1);
    table.write("rename", rename, 2);
    table.write("renamenx", renamenx, 2);
    table.write("flushdb", flushdb, 0);
    table.read("keys", keys, 1);
    table.read("dbsize", dbsize, 0);
}

fn key_names(args: &[Bytes]) -> impl Iterator<Item = String> + '_ {
    args.iter()
        .map(|key| String::from_utf8_lossy(key).into_owned())
}

// https://redis.io/commands/del
fn del(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let keys: Vec<String> = key_names(args).collect();
    let removed = db.remove_keys(keys.iter().map(String::as_str));

    Ok(Frame::Integer(removed))
}

/// Returns the number of keys that exist from those specified as arguments. A key mentioned
/// multiple times is counted multiple times.
///
/// Ref: <https://redis.io/docs/latest/commands/exists/>
fn exists(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let count = key_names(args).filter(|key| db.dict().contains(key)).count();

    Ok(Frame::Integer(count as i64))
}

/// Returns the string representation of the type of the value stored at `key`, or `none` when
/// the key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/type/>
fn type_(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;

    let kind = db.dict().get(&key).map_or("none", |entity| entity.kind());

    Ok(Frame::Simple(kind.to_string()))
}

/// Renames `src` to `dst`, overwriting `dst` if it exists.
///
/// Ref: <https://redis.io/docs/latest/commands/rename/>
fn rename(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let src = parser.next_string()?;
    let dst = parser.next_string()?;

    let entity = db.dict().remove(&src).ok_or(CommandError::NoSuchKey)?;
    db.dict().put(dst, entity);

    Ok(Frame::ok())
}

/// Renames `src` to `dst` if `dst` does not exist yet.
///
/// Ref: <https://redis.io/docs/latest/commands/renamenx/>
fn renamenx(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let src = parser.next_string()?;
    let dst = parser.next_string()?;

    if db.dict().contains(&dst) {
        return Ok(Frame::Integer(0));
    }

    let entity = db.dict().remove(&src).ok_or(CommandError::NoSuchKey)?;
    if db.dict().put_if_absent(dst, entity.clone()) == 0 {
        // `dst` was created concurrently, put `src` back.
        db.dict().put_if_absent(src, entity);
        return Ok(Frame::Integer(0));
    }

    Ok(Frame::Integer(1))
}

/// Deletes all the keys of the currently selected database.
///
/// Ref: <https://redis.io/docs/latest/commands/flushdb/>
fn flushdb(db: &Database, _args: &[Bytes]) -> Result<Frame, CommandError> {
    db.flush();
    Ok(Frame::ok())
}

// https://redis.io/commands/keys
fn keys(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let pattern = CommandParser::new(args).next_string()?;

    let mut matches: Vec<String> = db
        .dict()
        .keys()
        .into_iter()
        .filter(|key| glob_match(&pattern, key))
        .collect();
    matches.sort();

    let res = matches
        .into_iter()
        .map(|key| Frame::Bulk(Bytes::from(key)))
        .collect();

    Ok(Frame::Array(res))
}

/// Return the number of keys in the currently-selected database.
///
/// Ref: <https://redis.io/docs/latest/commands/dbsize/>
fn dbsize(db: &Database, _args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(Frame::Integer(db.dict().len() as i64))
}
