use std::fmt::Display;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use parley_types::UserId;

use crate::codec::{self, Frame};
use crate::config::GatewayConfig;
use crate::hub::Hub;
use crate::router::MessageRouter;

/// Receiving end of a connection's outbound queue. Owned by the write pump.
pub type OutboundQueue = mpsc::Receiver<Frame>;

/// Identifies one session of one user. Two sessions of the same user differ
/// in `conn_id`, which is what lets a stale session's late unregister be a
/// no-op after a takeover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub user_id: UserId,
    pub conn_id: Uuid,
}

/// The registry's handle on a live session: the producing side of its
/// bounded outbound queue. Dropping it closes the queue.
#[derive(Debug)]
pub struct Connection {
    key: ConnectionKey,
    outbound: mpsc::Sender<Frame>,
}

impl Connection {
    pub fn new(user_id: UserId, capacity: usize) -> (Self, OutboundQueue) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let key = ConnectionKey {
            user_id,
            conn_id: Uuid::new_v4(),
        };
        (Self { key, outbound }, queue)
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn user_id(&self) -> UserId {
        self.key.user_id
    }

    pub(crate) fn try_enqueue(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.outbound.try_send(frame)
    }
}

/// Run one authenticated WebSocket session to completion.
///
/// Registers with the hub, runs the read and write pumps as separate tasks,
/// and routes every exit through `Hub::unregister` exactly once.
pub async fn serve(
    socket: WebSocket,
    hub: Hub,
    router: MessageRouter,
    user_id: UserId,
    config: GatewayConfig,
) {
    let (conn, queue) = Connection::new(user_id, config.outbound_capacity);
    let key = conn.key();
    hub.register(conn).await;

    info!(user_id, conn_id = %key.conn_id, "connection opened");

    let (sink, stream) = socket.split();
    let mut write_task = tokio::spawn(write_pump(sink, queue, config.clone()));
    let mut read_task = tokio::spawn(read_pump(stream, user_id, router, config.read_timeout));

    let writer_done = tokio::select! {
        _ = &mut read_task => false,
        _ = &mut write_task => {
            read_task.abort();
            true
        }
    };

    hub.unregister(key).await;

    if !writer_done {
        // The queue is closed now, so the writer sends Close and stops.
        if timeout(config.write_timeout, &mut write_task).await.is_err() {
            write_task.abort();
        }
    }

    info!(user_id, conn_id = %key.conn_id, "connection closed");
}

/// Inbound half: decode frames and hand them to the router until the peer
/// goes away or stays silent past `read_timeout`. Every received frame,
/// pongs included, restarts the liveness window.
pub async fn read_pump<S, E>(mut stream: S, user_id: UserId, router: MessageRouter, read_timeout: std::time::Duration)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = match timeout(read_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(user_id, "no frame or pong within {:?}, dropping connection", read_timeout);
                break;
            }
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(user_id, "transport error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => match codec::decode(text.as_str()) {
                Ok(frame) => router.dispatch(user_id, frame).await,
                Err(e) => {
                    let raw = text.as_str();
                    let cut = raw.char_indices().nth(200).map_or(raw.len(), |(i, _)| i);
                    warn!(user_id, "bad frame: {} -- raw: {}", e, &raw[..cut]);
                }
            },
            Message::Binary(data) => {
                debug!(user_id, "ignoring {} byte binary frame", data.len());
            }
            Message::Ping(_) | Message::Pong(_) => {
                trace!(user_id, "heartbeat");
            }
            Message::Close(_) => break,
        }
    }
}

/// Outbound half: drain the queue onto the transport, coalescing whatever is
/// already queued into one write, and ping when nothing else was sent for a
/// heartbeat period. Exits on queue closure (after sending Close) or on any
/// write failure.
pub async fn write_pump<S>(mut sink: S, mut queue: OutboundQueue, config: GatewayConfig)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let ping_period = config.ping_period();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let max_batch = config.outbound_capacity.max(1);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(first) = next else {
                    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                    break;
                };

                let mut batch = vec![first];
                while batch.len() < max_batch {
                    match queue.try_recv() {
                        Ok(frame) => batch.push(frame),
                        Err(_) => break,
                    }
                }
                let frames = batch.len();

                match timeout(config.write_timeout, sink.send(Message::Text(codec::coalesce(batch)))).await {
                    Ok(Ok(())) => {
                        trace!("wrote {} frame(s)", frames);
                        heartbeat.reset();
                    }
                    Ok(Err(e)) => {
                        debug!("write failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!("write exceeded {:?}, dropping connection", config.write_timeout);
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                match timeout(config.write_timeout, sink.send(Message::Ping(Default::default()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("ping failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!("ping exceeded {:?}, dropping connection", config.write_timeout);
                        break;
                    }
                }
            }
        }
    }

    let _ = timeout(config.write_timeout, sink.close()).await;
}
