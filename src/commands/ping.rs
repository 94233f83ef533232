use bytes::Bytes;

use crate::commands::{CommandError, CommandTable};
use crate::db::Database;
use crate::frame::Frame;

pub(crate) fn register(table: &mut CommandTable) {
    table.read("ping", ping, 0);
    table.read("client", client, -1);
}

/// Returns PONG. Used by clients to check that the connection is alive.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
fn ping(_db: &Database, _args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(Frame::Simple("PONG".to_string()))
}

/// Connection metadata such as `CLIENT SETINFO`, sent by client libraries on connect. Accepted
/// and ignored.
///
/// Ref: <https://redis.io/docs/latest/commands/client-setinfo/>
fn client(_db: &Database, _args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(Frame::ok())
}
