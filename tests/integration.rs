mod common;

use redis::RedisError;
use serial_test::serial;
use shardis::config::Config;
use shardis::server::run;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use common::start;

/// Writes raw bytes and reads until `expected_len` bytes arrived.
async fn raw_exchange(addr: &str, request: &[u8], expected_len: usize) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = vec![0; expected_len];
    timeout(Duration::from_secs(5), stream.read_exact(&mut response))
        .await
        .unwrap()
        .unwrap();

    response
}

#[tokio::test]
async fn test_strings() {
    let server = start(Config::default()).await;
    let mut con = server.connect().await;

    let (set, get, missing): (String, String, Option<String>) = redis::pipe()
        .cmd("SET")
        .arg("key_1")
        .arg("Argentina")
        .cmd("GET")
        .arg("key_1")
        .cmd("GET")
        .arg("nonexistentkey")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(set, "OK");
    assert_eq!(get, "Argentina");
    assert_eq!(missing, None);

    let values: Vec<Option<String>> = redis::pipe()
        .cmd("MSET")
        .arg("a")
        .arg("1")
        .arg("b")
        .arg("2")
        .ignore()
        .cmd("MGET")
        .arg("a")
        .arg("b")
        .arg("c")
        .query_async::<_, (Vec<Option<String>>,)>(&mut con)
        .await
        .unwrap()
        .0;
    assert_eq!(values, vec![Some("1".into()), Some("2".into()), None]);

    let (incr, incrby, decr, decrby, strlen): (i64, i64, i64, i64, i64) = redis::pipe()
        .cmd("INCR")
        .arg("counter")
        .cmd("INCRBY")
        .arg("counter")
        .arg(10)
        .cmd("DECR")
        .arg("counter")
        .cmd("DECRBY")
        .arg("counter")
        .arg(5)
        .cmd("STRLEN")
        .arg("key_1")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!((incr, incrby, decr, decrby, strlen), (1, 11, 10, 5, 9));

    let (setnx_new, setnx_existing, getset): (i64, i64, String) = redis::pipe()
        .cmd("SETNX")
        .arg("nx")
        .arg("first")
        .cmd("SETNX")
        .arg("nx")
        .arg("second")
        .cmd("GETSET")
        .arg("nx")
        .arg("third")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!((setnx_new, setnx_existing), (1, 0));
    assert_eq!(getset, "first");
}

#[tokio::test]
async fn test_errors() {
    let server = start(Config::default()).await;
    let mut con = server.connect().await;

    let _: () = redis::cmd("SET")
        .arg("key")
        .arg("234293482390480948029348230948")
        .query_async(&mut con)
        .await
        .unwrap();

    let err: RedisError = redis::cmd("INCR")
        .arg("key")
        .query_async::<_, i64>(&mut con)
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("value is not an integer or out of range"));

    let err: RedisError = redis::cmd("LPUSH")
        .arg("key")
        .arg("a")
        .query_async::<_, i64>(&mut con)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("WRONGTYPE"));

    let err: RedisError = redis::cmd("GET")
        .query_async::<_, Option<String>>(&mut con)
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("wrong number of arguments for 'get' command"));

    let err: RedisError = redis::cmd("NOPE")
        .query_async::<_, ()>(&mut con)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown command 'nope'"));

    // The connection is still usable.
    let pong: String = redis::cmd("PING").query_async(&mut con).await.unwrap();
    assert_eq!(pong, "PONG");
}

#[tokio::test]
async fn test_keyspace() {
    let server = start(Config::default()).await;
    let mut con = server.connect().await;

    let _: () = redis::cmd("MSET")
        .arg("user:1")
        .arg("a")
        .arg("user:2")
        .arg("b")
        .arg("order:1")
        .arg("c")
        .query_async(&mut con)
        .await
        .unwrap();

    let keys: Vec<String> = redis::cmd("KEYS")
        .arg("user:*")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(keys, vec!["user:1", "user:2"]);

    let (exists, kind, renamed, dbsize): (i64, String, String, i64) = redis::pipe()
        .cmd("EXISTS")
        .arg("user:1")
        .arg("user:3")
        .cmd("TYPE")
        .arg("order:1")
        .cmd("RENAME")
        .arg("order:1")
        .arg("order:2")
        .cmd("DBSIZE")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!((exists, kind.as_str(), renamed.as_str(), dbsize), (1, "string", "OK", 3));

    let (deleted, flushed, dbsize): (i64, String, i64) = redis::pipe()
        .cmd("DEL")
        .arg("user:1")
        .arg("nope")
        .cmd("FLUSHDB")
        .cmd("DBSIZE")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!((deleted, flushed.as_str(), dbsize), (1, "OK", 0));
}

#[tokio::test]
async fn test_lists() {
    let server = start(Config::default()).await;
    let mut con = server.connect().await;

    let (pushed, _, range, popped, len): (i64, i64, Vec<String>, String, i64) = redis::pipe()
        .cmd("RPUSH")
        .arg("list")
        .arg("b")
        .arg("c")
        .cmd("LPUSH")
        .arg("list")
        .arg("a")
        .cmd("LRANGE")
        .arg("list")
        .arg(0)
        .arg(-1)
        .cmd("RPOP")
        .arg("list")
        .cmd("LLEN")
        .arg("list")
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(pushed, 2);
    assert_eq!(range, vec!["a", "b", "c"]);
    assert_eq!(popped, "c");
    assert_eq!(len, 2);
}

#[tokio::test]
async fn test_select() {
    let server = start(Config::default()).await;
    let mut con = server.connect().await;

    let (_, _, _, in_db_1, _, in_db_0): ((), (), (), Option<String>, (), Option<String>) =
        redis::pipe()
            .cmd("SET")
            .arg("key")
            .arg("zero")
            .cmd("SELECT")
            .arg(1)
            .cmd("SET")
            .arg("other")
            .arg("one")
            .cmd("GET")
            .arg("key")
            .cmd("SELECT")
            .arg(0)
            .cmd("GET")
            .arg("key")
            .query_async(&mut con)
            .await
            .unwrap();
    assert_eq!(in_db_1, None);
    assert_eq!(in_db_0, Some("zero".to_string()));

    let err: RedisError = redis::cmd("SELECT")
        .arg(16)
        .query_async::<_, ()>(&mut con)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("DB index is out of range"));
}

#[tokio::test]
async fn test_protocol_error_keeps_connection() {
    let server = start(Config::default()).await;

    let expected = b"-ERR Protocol error: invalid length: 'x'\r\n+PONG\r\n";
    let response = raw_exchange(
        &server.addr,
        b"*x\r\n*1\r\n$4\r\nPING\r\n",
        expected.len(),
    )
    .await;

    assert_eq!(response, expected);
}

#[tokio::test]
async fn test_inline_command() {
    let server = start(Config::default()).await;

    let response = raw_exchange(&server.addr, b"SET key value\r\nGET key\r\n", 16).await;

    assert_eq!(response, b"+OK\r\n$5\r\nvalue\r\n");
}

#[tokio::test]
#[serial]
async fn test_run() {
    let config = Config {
        port: 6378,
        ..Config::default()
    };
    tokio::spawn(run(config));
    sleep(Duration::from_millis(100)).await;

    let client = redis::Client::open("redis://127.0.0.1:6378/").unwrap();
    let mut con = client.get_multiplexed_async_connection().await.unwrap();

    let pong: String = redis::cmd("PING").query_async(&mut con).await.unwrap();
    assert_eq!(pong, "PONG");
}
