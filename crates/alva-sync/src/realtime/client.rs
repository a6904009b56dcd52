//! Realtime socket client over `tokio-tungstenite`.
//!
//! One socket carries every channel. A handler task owns the socket and
//! routes pushes to per-topic queues; callers only talk to it through a
//! command channel.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alva_core::{BackendError, RawChange, Table};

use super::protocol::{topic_for, Frame, PHX_CLOSE, PHX_ERROR, PHX_REPLY, POSTGRES_CHANGES};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type JoinReply = oneshot::Sender<Result<mpsc::UnboundedReceiver<RawChange>, BackendError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub heartbeat_interval: Duration,
    pub join_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            join_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Join { table: Table, reply: JoinReply },
    Leave { topic: String },
}

pub struct RealtimeClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    join_timeout: Duration,
    _handler: JoinHandle<()>,
}

impl RealtimeClient {
    /// Open the socket. `access_token` is presented on every join so
    /// row-level security applies to the feed. The handshake gets the same
    /// deadline as a join.
    pub async fn connect(
        url: &str,
        access_token: String,
        config: RealtimeConfig,
    ) -> Result<Self, BackendError> {
        let (ws, _) = tokio::time::timeout(config.join_timeout, connect_async(url))
            .await
            .map_err(|_| BackendError::Realtime("websocket connect timed out".into()))?
            .map_err(|e| BackendError::Realtime(format!("websocket connect: {e}")))?;
        info!("realtime socket connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handler = tokio::spawn(handler_loop(
            ws,
            cmd_rx,
            access_token,
            config.heartbeat_interval,
            cancel.clone(),
        ));

        Ok(Self {
            cmd_tx,
            cancel,
            join_timeout: config.join_timeout,
            _handler: handler,
        })
    }

    /// Join the table's channel and wait for the server to acknowledge it.
    /// A join that times out is abandoned and the channel left.
    pub async fn subscribe(&self, table: Table) -> Result<ChannelStream, BackendError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Join { table, reply })
            .map_err(|_| BackendError::ChannelClosed)?;

        let Ok(joined) = tokio::time::timeout(self.join_timeout, rx).await else {
            let _ = self.cmd_tx.send(Command::Leave {
                topic: topic_for(table),
            });
            return Err(BackendError::Realtime(format!("join {table} timed out")));
        };
        let changes = joined.map_err(|_| BackendError::ChannelClosed)??;

        Ok(ChannelStream {
            topic: topic_for(table),
            changes,
            leave: self.cmd_tx.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Close the socket. Every open channel stream ends.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Changes for one joined channel. Dropping it leaves the channel.
pub struct ChannelStream {
    topic: String,
    changes: mpsc::UnboundedReceiver<RawChange>,
    leave: mpsc::UnboundedSender<Command>,
}

impl ChannelStream {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Stream for ChannelStream {
    type Item = RawChange;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RawChange>> {
        self.get_mut().changes.poll_recv(cx)
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        let _ = self.leave.send(Command::Leave {
            topic: std::mem::take(&mut self.topic),
        });
    }
}

struct PendingJoin {
    topic: String,
    table: Table,
    reply: JoinReply,
}

/// Socket-side bookkeeping: joined topics, joins awaiting a reply, and
/// the outstanding heartbeat.
#[derive(Default)]
struct Router {
    next_ref: u64,
    channels: HashMap<String, mpsc::UnboundedSender<RawChange>>,
    joins: HashMap<String, PendingJoin>,
    heartbeat: Option<String>,
}

impl Router {
    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    /// Forget `topic`, joined or still joining. Returns the leave frame to
    /// send if there was anything to forget.
    fn leave(&mut self, topic: String) -> Option<Frame> {
        let joined = self.channels.remove(&topic).is_some();
        let before = self.joins.len();
        self.joins.retain(|_, join| join.topic != topic);
        if !joined && self.joins.len() == before {
            return None;
        }
        debug!(%topic, "leaving channel");
        let reference = self.next_ref();
        Some(Frame::leave(topic, reference))
    }

    fn on_frame(&mut self, frame: Frame) {
        match frame.event.as_str() {
            PHX_REPLY => self.on_reply(frame),
            POSTGRES_CHANGES => {
                let Some(change) = frame.postgres_change() else {
                    warn!(topic = %frame.topic, "undecodable postgres_changes push, skipping");
                    return;
                };
                let delivered = self
                    .channels
                    .get(&frame.topic)
                    .is_some_and(|tx| tx.send(change).is_ok());
                if !delivered {
                    debug!(topic = %frame.topic, "push for a channel nobody listens to");
                }
            }
            PHX_ERROR | PHX_CLOSE => {
                if self.channels.remove(&frame.topic).is_some() {
                    warn!(topic = %frame.topic, event = %frame.event, "channel closed by server");
                }
            }
            _ => {}
        }
    }

    fn on_reply(&mut self, frame: Frame) {
        let Some(reference) = frame.reference.clone() else { return };
        if self.heartbeat.as_ref() == Some(&reference) {
            self.heartbeat = None;
            return;
        }
        let Some(join) = self.joins.remove(&reference) else { return };
        if join.reply.is_closed() {
            debug!(table = %join.table, "join answered after its caller gave up");
            return;
        }
        match frame.reply_status() {
            Ok(()) => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.channels.insert(join.topic.clone(), tx);
                info!(table = %join.table, topic = %join.topic, "channel joined");
                let _ = join.reply.send(Ok(rx));
            }
            Err(reason) => {
                warn!(table = %join.table, %reason, "channel join rejected");
                let _ = join.reply.send(Err(BackendError::Realtime(reason)));
            }
        }
    }
}

async fn handler_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    access_token: String,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut router = Router::default();
    let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outgoing = tokio::select! {
            () = cancel.cancelled() => break,
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Join { table, reply } => {
                        let reference = router.next_ref();
                        let frame = Frame::join(table, &access_token, reference.clone());
                        let topic = frame.topic.clone();
                        let _ = router.joins.insert(reference, PendingJoin { topic, table, reply });
                        Some(frame)
                    }
                    Command::Leave { topic } => router.leave(topic),
                }
            }
            _ = heartbeat.tick() => {
                if router.heartbeat.is_some() {
                    warn!("heartbeat not acknowledged, closing realtime socket");
                    break;
                }
                let reference = router.next_ref();
                router.heartbeat = Some(reference.clone());
                Some(Frame::heartbeat(reference))
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(error = %e, "realtime socket error");
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => router.on_frame(frame),
                        Err(e) => warn!(error = %e, "unparseable realtime frame"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
                None
            }
        };

        if let Some(frame) = outgoing {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                warn!("realtime socket write failed");
                break;
            }
        }
    }

    let _ = ws_tx.close().await;
    info!(channels = router.channels.len(), "realtime socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use alva_core::ChangeKind;
    use serde_json::json;

    fn reply(reference: &str, status: &str) -> Frame {
        Frame::new(
            "realtime:tasks-changes",
            PHX_REPLY,
            json!({"status": status, "response": {}}),
            Some(reference.to_string()),
        )
    }

    #[test]
    fn refs_increase() {
        let mut router = Router::default();
        assert_eq!(router.next_ref(), "1");
        assert_eq!(router.next_ref(), "2");
    }

    #[tokio::test]
    async fn ok_reply_opens_channel_and_routes_pushes() {
        let mut router = Router::default();
        let (reply_tx, reply_rx) = oneshot::channel();
        router.joins.insert(
            "1".into(),
            PendingJoin {
                topic: "realtime:tasks-changes".into(),
                table: Table::Tasks,
                reply: reply_tx,
            },
        );
        router.on_frame(reply("1", "ok"));
        let mut rx = reply_rx.await.unwrap().unwrap();

        router.on_frame(Frame::new(
            "realtime:tasks-changes",
            POSTGRES_CHANGES,
            json!({"data": {"table": "tasks", "type": "DELETE", "old_record": {"id": "t1"}}}),
            None,
        ));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.row_id(), Some("t1"));
    }

    #[tokio::test]
    async fn error_reply_fails_the_join() {
        let mut router = Router::default();
        let (reply_tx, reply_rx) = oneshot::channel();
        router.joins.insert(
            "3".into(),
            PendingJoin {
                topic: "realtime:tasks-changes".into(),
                table: Table::Tasks,
                reply: reply_tx,
            },
        );
        router.on_frame(reply("3", "error"));
        assert!(matches!(reply_rx.await.unwrap(), Err(BackendError::Realtime(_))));
        assert!(router.channels.is_empty());
    }

    #[test]
    fn heartbeat_reply_clears_outstanding() {
        let mut router = Router::default();
        router.heartbeat = Some("5".into());
        router.on_frame(reply("5", "ok"));
        assert!(router.heartbeat.is_none());
    }

    #[tokio::test]
    async fn abandoned_join_is_left_and_never_registered() {
        let mut router = Router::default();
        let (reply_tx, reply_rx) = oneshot::channel();
        router.joins.insert(
            "4".into(),
            PendingJoin {
                topic: "realtime:tasks-changes".into(),
                table: Table::Tasks,
                reply: reply_tx,
            },
        );
        drop(reply_rx);

        let leave = router.leave("realtime:tasks-changes".into()).unwrap();
        assert_eq!(leave.event, "phx_leave");
        assert!(router.joins.is_empty());

        router.on_frame(reply("4", "ok"));
        assert!(router.channels.is_empty());
        assert!(router.leave("realtime:tasks-changes".into()).is_none());
    }

    #[test]
    fn late_ok_for_a_dropped_caller_is_ignored() {
        let mut router = Router::default();
        let (reply_tx, reply_rx) = oneshot::channel();
        router.joins.insert(
            "6".into(),
            PendingJoin {
                topic: "realtime:tasks-changes".into(),
                table: Table::Tasks,
                reply: reply_tx,
            },
        );
        drop(reply_rx);
        router.on_frame(reply("6", "ok"));
        assert!(router.channels.is_empty());
        assert!(router.joins.is_empty());
    }

    #[test]
    fn server_error_drops_channel() {
        let mut router = Router::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        router.channels.insert("realtime:tasks-changes".into(), tx);
        router.on_frame(Frame::new("realtime:tasks-changes", PHX_ERROR, json!({}), None));
        assert!(router.channels.is_empty());
    }
}
