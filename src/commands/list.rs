use bytes::Bytes;
use std::collections::VecDeque;

use crate::commands::{CommandError, CommandParser, CommandTable};
use crate::db::Database;
use crate::dict::Entity;
use crate::frame::Frame;

pub(crate) fn register(table: &mut CommandTable) {
    table.write("lpush", lpush, -2);
    table.write("rpush", rpush, -2);
    table.write("lpop", lpop, 1);
    table.write("rpop", rpop, 1);
    table.read("llen", llen, 1);
    table.read("lrange", lrange, 3);
}

#[derive(Clone, Copy)]
enum End {
    Head,
    Tail,
}

/// Insert all the specified values at the head of the list stored at key, creating it when
/// missing. Returns the length of the list after the push.
///
/// Ref: <https://redis.io/docs/latest/commands/lpush/>
fn lpush(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    push(db, args, End::Head)
}

/// Like LPUSH, inserting at the tail.
///
/// Ref: <https://redis.io/docs/latest/commands/rpush/>
fn rpush(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    push(db, args, End::Tail)
}

/// Removes and returns the first element of the list stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/lpop/>
fn lpop(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    pop(db, args, End::Head)
}

// https://redis.io/commands/rpop
fn rpop(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    pop(db, args, End::Tail)
}

fn push(db: &Database, args: &[Bytes], end: End) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let values = parser.remaining();

    db.dict().update(&key, |current| {
        let mut list = match current {
            None => VecDeque::new(),
            Some(Entity::List(list)) => list.clone(),
            Some(_) => return Err(CommandError::WrongType),
        };

        for value in values {
            match end {
                End::Head => list.push_front(value.clone()),
                End::Tail => list.push_back(value.clone()),
            }
        }

        let len = list.len() as i64;
        Ok((Some(Entity::List(list)), Frame::Integer(len)))
    })
}

fn pop(db: &Database, args: &[Bytes], end: End) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;

    db.dict().update(&key, |current| {
        let mut list = match current {
            None => return Ok((None, Frame::Null)),
            Some(Entity::List(list)) => list.clone(),
            Some(_) => return Err(CommandError::WrongType),
        };

        let value = match end {
            End::Head => list.pop_front(),
            End::Tail => list.pop_back(),
        };

        // Empty lists are removed.
        let entity = (!list.is_empty()).then_some(Entity::List(list));

        Ok((entity, value.map_or(Frame::Null, Frame::Bulk)))
    })
}

fn get_list(db: &Database, key: &str) -> Result<Option<VecDeque<Bytes>>, CommandError> {
    match db.dict().get(key) {
        None => Ok(None),
        Some(Entity::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

/// Returns the length of the list stored at key, 0 when the key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/llen/>
fn llen(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;

    let len = get_list(db, &key)?.map_or(0, |list| list.len());

    Ok(Frame::Integer(len as i64))
}

/// Returns the elements between `start` and `stop`, both inclusive. Negative offsets count from
/// the end of the list, out of range offsets are clamped.
///
/// Ref: <https://redis.io/docs/latest/commands/lrange/>
fn lrange(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let start = parser.next_integer()?;
    let stop = parser.next_integer()?;

    let Some(list) = get_list(db, &key)? else {
        return Ok(Frame::Array(vec![]));
    };

    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len {
        return Ok(Frame::Array(vec![]));
    }

    let items = list
        .into_iter()
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .map(Frame::Bulk)
        .collect();

    Ok(Frame::Array(items))
}
