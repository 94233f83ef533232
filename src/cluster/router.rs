use itertools::Itertools;
use std::collections::HashMap;

use crate::frame::Frame;

/// How a command is dispatched in cluster mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Executed by this node only. Connection level commands.
    Local,
    /// Relayed to the owner of the first key.
    ByKey,
    /// Two keys that must live on the same node, relayed to it.
    SameOwner,
    /// Sent to every node, replies merged.
    Broadcast(Aggregate),
}

/// How broadcast replies are merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    SumIntegers,
    AllOk,
    Concat,
}

pub type Router = HashMap<&'static str, Route>;

pub fn make_router() -> Router {
    let mut router = HashMap::new();

    router.insert("ping", Route::Local);
    router.insert("select", Route::Local);
    router.insert("client", Route::Local);

    router.insert("del", Route::Broadcast(Aggregate::SumIntegers));
    router.insert("dbsize", Route::Broadcast(Aggregate::SumIntegers));
    // Keys live on their owner only, so per-node counts add up.
    router.insert("exists", Route::Broadcast(Aggregate::SumIntegers));
    router.insert("flushdb", Route::Broadcast(Aggregate::AllOk));
    router.insert("keys", Route::Broadcast(Aggregate::Concat));

    router.insert("rename", Route::SameOwner);
    router.insert("renamenx", Route::SameOwner);

    for name in [
        "get", "set", "setnx", "getset", "type", "strlen", "incr", "incrby", "decr",
        "decrby", "lpush", "rpush", "lpop", "rpop", "llen", "lrange",
    ] {
        router.insert(name, Route::ByKey);
    }

    router
}

/// Merges the replies of a broadcast, keyed by node. The first error reply wins.
pub fn aggregate(how: Aggregate, replies: HashMap<String, Frame>) -> Frame {
    // Sorted by node so merged arrays come out in a stable order.
    let replies: Vec<Frame> = replies
        .into_iter()
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, reply)| reply)
        .collect();

    if let Some(Frame::Error(msg)) = replies.iter().find(|reply| reply.is_error()) {
        return error_occurs(msg);
    }

    match how {
        Aggregate::SumIntegers => {
            let mut sum = 0;
            for reply in replies {
                match reply {
                    Frame::Integer(n) => sum += n,
                    other => return error_occurs(&format!("unexpected reply '{}'", other)),
                }
            }
            Frame::Integer(sum)
        }
        Aggregate::AllOk => Frame::ok(),
        Aggregate::Concat => {
            let items = replies
                .into_iter()
                .flat_map(|reply| match reply {
                    Frame::Array(items) => items,
                    other => vec![other],
                })
                .collect();
            Frame::Array(items)
        }
    }
}

fn error_occurs(msg: &str) -> Frame {
    Frame::Error(format!("ERR error occurs: {}", msg))
}
