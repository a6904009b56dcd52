//! Phoenix channel frames as spoken by the realtime change-feed socket.
//!
//! Every frame is `{topic, event, payload, ref}`. Channels are joined with
//! `phx_join` and acknowledged by a `phx_reply` carrying the same ref;
//! row changes arrive as `postgres_changes` pushes on the channel's topic.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use alva_core::{ChangeKind, RawChange, Table};

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const POSTGRES_CHANGES: &str = "postgres_changes";

/// Topic heartbeats are sent on.
pub const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn new(topic: impl Into<String>, event: &str, payload: Value, reference: Option<String>) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            reference,
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self::new(PHOENIX_TOPIC, HEARTBEAT, json!({}), Some(reference))
    }

    /// Join request for one table's feed, listening for the table's change kinds.
    pub fn join(table: Table, access_token: &str, reference: String) -> Self {
        let filters: Vec<Value> = table
            .feed_kinds()
            .iter()
            .map(|kind| {
                json!({
                    "event": kind.as_str(),
                    "schema": "public",
                    "table": table.as_str(),
                })
            })
            .collect();
        let payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": filters,
            },
            "access_token": access_token,
        });
        Self::new(topic_for(table), PHX_JOIN, payload, Some(reference))
    }

    pub fn leave(topic: impl Into<String>, reference: String) -> Self {
        Self::new(topic, PHX_LEAVE, json!({}), Some(reference))
    }

    /// `Ok(())` for an `ok` reply, otherwise the server's reason.
    pub fn reply_status(&self) -> Result<(), String> {
        match self.payload.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            Some(status) => Err(self
                .payload
                .pointer("/response/reason")
                .and_then(Value::as_str)
                .map_or_else(|| status.to_string(), |reason| format!("{status}: {reason}"))),
            None => Err("reply without status".to_string()),
        }
    }

    /// Extract the row change from a `postgres_changes` push.
    pub fn postgres_change(&self) -> Option<RawChange> {
        if self.event != POSTGRES_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?;
        let table = Table::from_name(data.get("table")?.as_str()?)?;
        let kind: ChangeKind = serde_json::from_value(data.get("type")?.clone()).ok()?;
        let field = |name: &str| {
            data.get(name)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()))
        };
        Some(RawChange {
            table,
            kind,
            record: field("record"),
            old_record: field("old_record"),
        })
    }
}

pub fn topic_for(table: Table) -> String {
    format!("realtime:{}", table.channel_name())
}

/// Socket URL for a project base URL: http(s) becomes ws(s).
pub fn socket_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}
