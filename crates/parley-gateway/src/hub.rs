use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use parley_types::UserId;
use parley_types::events::ServerFrame;

use crate::codec::{self, Frame};
use crate::connection::{Connection, ConnectionKey};
use crate::presence;

/// Depth of the hub's command channel.
const HUB_COMMAND_CAPACITY: usize = 1024;

/// Outcome of a single point-to-point delivery. Only `Queued` means the frame
/// will reach the wire; everything else is a silent drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// No connection registered for the user
    Offline,
    /// The user's outbound queue is at capacity
    QueueFull,
    /// The connection is shutting down and no longer drains its queue
    Closed,
    /// The frame could not be encoded
    Invalid,
}

/// The live connection table. Mutated only by the hub task; read from
/// anywhere for lookups and deliveries.
pub(crate) struct ConnectionTable {
    connections: RwLock<HashMap<UserId, Connection>>,
}

impl ConnectionTable {
    fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, Connection>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, Connection>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn deliver(&self, user_id: UserId, frame: Frame) -> Delivery {
        let connections = self.read();
        match connections.get(&user_id) {
            Some(conn) => enqueue(conn, frame),
            None => {
                debug!(user_id, "user offline, frame not delivered");
                Delivery::Offline
            }
        }
    }

    /// Non-blocking enqueue on every connection. Returns how many accepted.
    pub(crate) fn broadcast(&self, frame: &Frame) -> usize {
        let connections = self.read();
        connections
            .values()
            .filter(|conn| enqueue(conn, frame.clone()) == Delivery::Queued)
            .count()
    }
}

fn enqueue(conn: &Connection, frame: Frame) -> Delivery {
    match conn.try_enqueue(frame) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => {
            warn!(user_id = conn.user_id(), "outbound queue full, frame dropped");
            Delivery::QueueFull
        }
        Err(TrySendError::Closed(_)) => {
            debug!(user_id = conn.user_id(), "outbound queue closed, frame dropped");
            Delivery::Closed
        }
    }
}

enum HubCommand {
    Register {
        conn: Connection,
        done: oneshot::Sender<()>,
    },
    Unregister {
        key: ConnectionKey,
        done: oneshot::Sender<bool>,
    },
    Broadcast {
        frame: Frame,
    },
}

/// Process-wide registry of live connections.
///
/// Register, unregister and broadcast are serialized through a single hub
/// task, so presence events reach peers in mutation order. Lookups
/// (`is_online`, `deliver_to_user`) go straight to the table under a read lock.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    table: Arc<ConnectionTable>,
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Create the registry and start its task on the current runtime. The
    /// task ends once every `Hub` handle has been dropped.
    pub fn spawn() -> Self {
        let table = Arc::new(ConnectionTable::new());
        let (commands, rx) = mpsc::channel(HUB_COMMAND_CAPACITY);
        tokio::spawn(run(table.clone(), rx));

        Self {
            inner: Arc::new(HubInner { table, commands }),
        }
    }

    /// Make `conn` the user's live connection and announce them online.
    /// A connection already registered for the same user is closed.
    /// Returns once the table reflects the change.
    pub async fn register(&self, conn: Connection) {
        let (done, ack) = oneshot::channel();
        if self.inner.commands.send(HubCommand::Register { conn, done }).await.is_err() {
            error!("hub task is gone, cannot register connection");
            return;
        }
        let _ = ack.await;
    }

    /// Remove the connection if it is still the user's live one, closing its
    /// outbound queue and announcing the user offline. Returns whether
    /// anything was removed; repeated calls are no-ops.
    pub async fn unregister(&self, key: ConnectionKey) -> bool {
        let (done, ack) = oneshot::channel();
        if self.inner.commands.send(HubCommand::Unregister { key, done }).await.is_err() {
            error!("hub task is gone, cannot unregister connection");
            return false;
        }
        ack.await.unwrap_or(false)
    }

    /// Queue `frame` for every live connection. One full queue never holds
    /// up the others.
    pub async fn broadcast(&self, frame: &ServerFrame) {
        let frame = match codec::encode(frame) {
            Ok(frame) => frame,
            Err(e) => {
                error!("broadcast dropped: {}", e);
                return;
            }
        };
        if self.inner.commands.send(HubCommand::Broadcast { frame }).await.is_err() {
            error!("hub task is gone, broadcast dropped");
        }
    }

    /// Encode and queue `frame` for `user_id` without blocking.
    pub fn deliver_to_user(&self, user_id: UserId, frame: &ServerFrame) -> Delivery {
        match codec::encode(frame) {
            Ok(frame) => self.send_to_user(user_id, frame),
            Err(e) => {
                error!(user_id, "delivery dropped: {}", e);
                Delivery::Invalid
            }
        }
    }

    /// Encode once and queue for each of `users`.
    pub fn deliver_to_users(&self, users: &[UserId], frame: &ServerFrame) {
        let frame = match codec::encode(frame) {
            Ok(frame) => frame,
            Err(e) => {
                error!("delivery dropped: {}", e);
                return;
            }
        };
        for &user_id in users {
            self.send_to_user(user_id, frame.clone());
        }
    }

    /// Queue an already-encoded frame for `user_id` without blocking.
    pub fn send_to_user(&self, user_id: UserId, frame: Frame) -> Delivery {
        self.inner.table.deliver(user_id, frame)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner.table.read().contains_key(&user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.inner.table.read().keys().copied().collect()
    }
}

async fn run(table: Arc<ConnectionTable>, mut commands: mpsc::Receiver<HubCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { conn, done } => {
                let user_id = conn.user_id();
                presence::send_snapshot(&table, &conn);

                let previous = table.write().insert(user_id, conn);
                if let Some(previous) = previous {
                    // Dropping the handle closes the old session's queue.
                    info!(user_id, conn_id = %previous.key().conn_id, "connection taken over by new session");
                    drop(previous);
                }

                info!(user_id, "client registered");
                presence::announce(&table, user_id, true);
                let _ = done.send(());
            }

            HubCommand::Unregister { key, done } => {
                let removed = {
                    let mut connections = table.write();
                    match connections.get(&key.user_id) {
                        Some(current) if current.key() == key => connections.remove(&key.user_id),
                        _ => None,
                    }
                };

                let was_live = removed.is_some();
                drop(removed);

                if was_live {
                    info!(user_id = key.user_id, "client unregistered");
                    presence::announce(&table, key.user_id, false);
                }
                let _ = done.send(was_live);
            }

            HubCommand::Broadcast { frame } => {
                let delivered = table.broadcast(&frame);
                debug!("broadcast reached {} connection(s)", delivered);
            }
        }
    }

    debug!("hub task stopped");
}
