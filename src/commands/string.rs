use bytes::Bytes;
use itertools::Itertools;

use crate::commands::{parse_integer, CommandError, CommandParser, CommandTable};
use crate::db::Database;
use crate::dict::Entity;
use crate::frame::Frame;

pub(crate) fn register(table: &mut CommandTable) {
    table.read("get", get, 1);
    table.write("set", set, 2);
    table.write("setnx", setnx, 2);
    table.write("getset", getset, 2);
    table.write("mset", mset, -2);
    table.read("mget", mget, -1);
    table.read("strlen", strlen, 1);
    table.write("incr", incr, 1);
    table.write("incrby", incrby, 2);
    table.write("decr", decr, 1);
    table.write("decrby", decrby, 2);
}

/// Get the value of key. If the key does not exist the special value nil is returned. An error
/// is returned if the value stored at key is not a string.
///
/// Ref: <https://redis.io/docs/latest/commands/get/>
fn get(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;

    let res = db.get_string(&key)?.map_or(Frame::Null, Frame::Bulk);

    Ok(res)
}

/// Set key to hold the string value. If key already holds a value, it is overwritten,
/// regardless of its type.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
fn set(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let value = parser.next_bytes()?;

    db.put_string(key, value);

    Ok(Frame::ok())
}

/// Set key to hold string value if key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/setnx/>
fn setnx(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let value = parser.next_bytes()?;

    let inserted = db.dict().put_if_absent(key, Entity::String(value));

    Ok(Frame::Integer(inserted as i64))
}

/// Atomically sets key to value and returns the old value stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/getset/>
fn getset(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let value = parser.next_bytes()?;

    db.dict().update(&key, |current| {
        let old = match current {
            None => Frame::Null,
            Some(Entity::String(old)) => Frame::Bulk(old.clone()),
            Some(_) => return Err(CommandError::WrongType),
        };
        Ok((Some(Entity::String(value)), old))
    })
}

/// Sets the given keys to their respective values. Replaces existing values with new values.
///
/// Ref: <https://redis.io/docs/latest/commands/mset/>
fn mset(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    if args.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }

    for (key, value) in args.iter().tuples() {
        db.put_string(String::from_utf8_lossy(key).into_owned(), value.clone());
    }

    Ok(Frame::ok())
}

/// Returns the values of all specified keys. For every key that does not hold a string value or
/// does not exist, the special value nil is returned.
///
/// Ref: <https://redis.io/docs/latest/commands/mget/>
fn mget(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let values = args
        .iter()
        .map(|key| db.get_string(&String::from_utf8_lossy(key)))
        .map(|value| match value {
            Ok(Some(value)) => Frame::Bulk(value),
            Ok(None) | Err(_) => Frame::Null,
        })
        .collect();

    Ok(Frame::Array(values))
}

/// Returns the length of the string value stored at key, 0 when the key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/strlen/>
fn strlen(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;

    let len = db.get_string(&key)?.map_or(0, |value| value.len());

    Ok(Frame::Integer(len as i64))
}

/// Increments the number stored at key by one. If the key does not exist, it is set to 0 before
/// performing the operation.
///
/// Ref: <https://redis.io/docs/latest/commands/incr/>
fn incr(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;
    incr_by(db, &key, 1)
}

/// Increments the number stored at key by increment.
///
/// Ref: <https://redis.io/docs/latest/commands/incrby/>
fn incrby(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let delta = parser.next_integer()?;
    incr_by(db, &key, delta)
}

/// Decrements the number stored at key by one.
///
/// Ref: <https://redis.io/docs/latest/commands/decr/>
fn decr(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = CommandParser::new(args).next_string()?;
    incr_by(db, &key, -1)
}

/// Decrements the number stored at key by decrement.
///
/// Ref: <https://redis.io/docs/latest/commands/decrby/>
fn decrby(db: &Database, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut parser = CommandParser::new(args);
    let key = parser.next_string()?;
    let delta = parser
        .next_integer()?
        .checked_neg()
        .ok_or(CommandError::Overflow)?;
    incr_by(db, &key, delta)
}

// Read, add and write back under the key's lock so concurrent increments are never lost.
fn incr_by(db: &Database, key: &str, delta: i64) -> Result<Frame, CommandError> {
    db.dict().update(key, |current| {
        let value = match current {
            None => 0,
            Some(Entity::String(value)) => parse_integer(value)?,
            Some(_) => return Err(CommandError::WrongType),
        };

        let value = value.checked_add(delta).ok_or(CommandError::Overflow)?;
        let entity = Entity::String(Bytes::from(value.to_string()));

        Ok((Some(entity), Frame::Integer(value)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_utils::{database, exec};
    use std::collections::VecDeque;

    fn error(msg: &str) -> Frame {
        Frame::Error(msg.to_string())
    }

    fn list(db: &Database, key: &str) {
        db.dict().put(
            key.to_string(),
            Entity::List(VecDeque::from(vec![Bytes::from("x")])),
        );
    }

    #[tokio::test]
    async fn set_and_get() {
        let db = database();

        assert_eq!(exec(&db, &["SET", "key1", "Argentina"]).await, Frame::ok());
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("Argentina"));

        assert_eq!(exec(&db, &["SET", "key1", "Brasil"]).await, Frame::ok());
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("Brasil"));
    }

    #[tokio::test]
    async fn get_non_existing_key() {
        let db = database();

        assert_eq!(exec(&db, &["GET", "nope"]).await, Frame::Null);
    }

    #[tokio::test]
    async fn get_wrong_type() {
        let db = database();
        list(&db, "key1");

        assert_eq!(
            exec(&db, &["GET", "key1"]).await,
            error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }

    #[tokio::test]
    async fn set_overwrites_other_types() {
        let db = database();
        list(&db, "key1");

        assert_eq!(exec(&db, &["SET", "key1", "v"]).await, Frame::ok());
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("v"));
    }

    #[tokio::test]
    async fn setnx() {
        let db = database();

        assert_eq!(exec(&db, &["SETNX", "key1", "1"]).await, Frame::Integer(1));
        assert_eq!(exec(&db, &["SETNX", "key1", "2"]).await, Frame::Integer(0));
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("1"));
    }

    #[tokio::test]
    async fn getset() {
        let db = database();

        assert_eq!(exec(&db, &["GETSET", "key1", "1"]).await, Frame::Null);
        assert_eq!(exec(&db, &["GETSET", "key1", "2"]).await, Frame::bulk("1"));
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("2"));
    }

    #[tokio::test]
    async fn getset_wrong_type_does_not_overwrite() {
        let db = database();
        list(&db, "key1");

        assert!(exec(&db, &["GETSET", "key1", "2"]).await.is_error());
        assert!(matches!(db.dict().get("key1"), Some(Entity::List(_))));
    }

    #[tokio::test]
    async fn mset_and_mget() {
        let db = database();

        assert_eq!(exec(&db, &["MSET", "a", "1", "b", "2"]).await, Frame::ok());
        assert_eq!(
            exec(&db, &["MGET", "a", "b", "c"]).await,
            Frame::Array(vec![Frame::bulk("1"), Frame::bulk("2"), Frame::Null])
        );
    }

    #[tokio::test]
    async fn mset_odd_arguments() {
        let db = database();

        assert_eq!(
            exec(&db, &["MSET", "a", "1", "b"]).await,
            error("ERR syntax error")
        );
        assert!(db.dict().is_empty());
    }

    #[tokio::test]
    async fn mget_substitutes_nil_for_wrong_type() {
        let db = database();
        exec(&db, &["SET", "a", "1"]).await;
        list(&db, "b");

        assert_eq!(
            exec(&db, &["MGET", "a", "b"]).await,
            Frame::Array(vec![Frame::bulk("1"), Frame::Null])
        );
    }

    #[tokio::test]
    async fn strlen() {
        let db = database();
        exec(&db, &["SET", "a", "hello"]).await;

        assert_eq!(exec(&db, &["STRLEN", "a"]).await, Frame::Integer(5));
        assert_eq!(exec(&db, &["STRLEN", "b"]).await, Frame::Integer(0));
    }

    #[tokio::test]
    async fn incr_existing_key() {
        let db = database();
        exec(&db, &["SET", "key1", "1"]).await;

        assert_eq!(exec(&db, &["INCR", "key1"]).await, Frame::Integer(2));
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("2"));
    }

    #[tokio::test]
    async fn incr_non_existing_key() {
        let db = database();

        assert_eq!(exec(&db, &["INCR", "key1"]).await, Frame::Integer(1));
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("1"));
    }

    #[tokio::test]
    async fn incr_invalid_value() {
        let db = database();
        exec(&db, &["SET", "key1", "value"]).await;

        assert_eq!(
            exec(&db, &["INCR", "key1"]).await,
            error("ERR value is not an integer or out of range")
        );
        assert_eq!(exec(&db, &["GET", "key1"]).await, Frame::bulk("value"));
    }

    #[tokio::test]
    async fn incr_out_of_range() {
        let db = database();
        exec(&db, &["SET", "key1", "999223372036854775808"]).await;

        assert_eq!(
            exec(&db, &["INCR", "key1"]).await,
            error("ERR value is not an integer or out of range")
        );

        exec(&db, &["SET", "key1", &i64::MAX.to_string()]).await;
        assert_eq!(
            exec(&db, &["INCR", "key1"]).await,
            error("ERR increment or decrement would overflow")
        );
    }

    #[tokio::test]
    async fn incrby_and_decrby() {
        let db = database();

        assert_eq!(exec(&db, &["INCRBY", "a", "10"]).await, Frame::Integer(10));
        assert_eq!(exec(&db, &["INCRBY", "a", "-3"]).await, Frame::Integer(7));
        assert_eq!(exec(&db, &["DECRBY", "b", "5"]).await, Frame::Integer(-5));
        assert_eq!(exec(&db, &["DECRBY", "a", "7"]).await, Frame::Integer(0));
        assert_eq!(exec(&db, &["DECR", "c"]).await, Frame::Integer(-1));
        assert_eq!(
            exec(&db, &["INCRBY", "a", "ten"]).await,
            error("ERR value is not an integer or out of range")
        );
    }

    #[tokio::test]
    async fn incr_wrong_type() {
        let db = database();
        list(&db, "key1");

        assert_eq!(
            exec(&db, &["INCR", "key1"]).await,
            error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }
}
