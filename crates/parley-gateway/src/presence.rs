//! Online/offline events derived from registry mutations. Presence is never
//! stored; it is whatever the connection table holds right now.

use tracing::{debug, error};

use parley_types::UserId;
use parley_types::events::ServerFrame;

use crate::codec;
use crate::connection::Connection;
use crate::hub::ConnectionTable;

pub fn status_frame(user_id: UserId, online: bool) -> ServerFrame {
    ServerFrame::UserStatus { user_id, online }
}

/// Broadcast a status change to every live connection. Called from the hub
/// task right after the mutation, so peers see changes in mutation order.
pub(crate) fn announce(table: &ConnectionTable, user_id: UserId, online: bool) {
    let frame = match codec::encode(&status_frame(user_id, online)) {
        Ok(frame) => frame,
        Err(e) => {
            error!(user_id, "presence event dropped: {}", e);
            return;
        }
    };

    let delivered = table.broadcast(&frame);
    debug!(user_id, online, "presence reached {} connection(s)", delivered);
}

/// Tell a connection that is about to be registered who is already online.
pub(crate) fn send_snapshot(table: &ConnectionTable, conn: &Connection) {
    let online: Vec<UserId> = table
        .read()
        .keys()
        .copied()
        .filter(|&user_id| user_id != conn.user_id())
        .collect();

    for user_id in online {
        match codec::encode(&status_frame(user_id, true)) {
            Ok(frame) => {
                if conn.try_enqueue(frame).is_err() {
                    debug!(user_id = conn.user_id(), "presence snapshot truncated");
                    break;
                }
            }
            Err(e) => error!(user_id, "presence snapshot entry dropped: {}", e),
        }
    }
}
