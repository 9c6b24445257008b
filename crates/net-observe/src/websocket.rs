//! WebSocket traffic recording. Connections and their frames accumulate in
//! memory and are dumped as one artifact at session end; a notice event
//! marks every socket open in the audit log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use evidence_log::{json::safe_parse, LogLevel, LogStore};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WsMessage {
    /// Browser-reported capture timestamp (seconds).
    pub timestamp: f64,
    /// Direction: "out" for sent frames, "in" for received ones.
    pub io: String,
    /// Payload split on newlines, each part parsed-or-raw.
    pub m: Vec<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WsConnection {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub messages: Vec<WsMessage>,
}

pub struct WsRecorder {
    log: Arc<LogStore>,
    sockets: DashMap<String, WsConnection>,
}

impl WsRecorder {
    pub fn new(log: Arc<LogStore>) -> Self {
        Self {
            log,
            sockets: DashMap::new(),
        }
    }

    pub fn on_created(&self, request_id: &str, url: &str) {
        self.sockets
            .entry(request_id.to_string())
            .or_insert_with(|| WsConnection {
                timestamp: Utc::now(),
                url: url.to_string(),
                messages: Vec::new(),
            });
        self.log.notice(
            LogLevel::Warn,
            "WebSocket",
            format!("WebSocket opened with url {url}"),
        );
    }

    pub fn on_frame_sent(&self, request_id: &str, timestamp: f64, payload: &str) {
        self.record(request_id, timestamp, "out", payload);
    }

    pub fn on_frame_received(&self, request_id: &str, timestamp: f64, payload: &str) {
        self.record(request_id, timestamp, "in", payload);
    }

    fn record(&self, request_id: &str, timestamp: f64, io: &str, payload: &str) {
        // Frames can arrive for sockets created before recording started;
        // those are dropped rather than invented.
        if let Some(mut conn) = self.sockets.get_mut(request_id) {
            conn.messages.push(WsMessage {
                timestamp,
                io: io.to_string(),
                m: payload.split('\n').map(safe_parse).collect(),
            });
        }
    }

    /// Ordered dump for the `websockets-log.json` artifact.
    pub fn snapshot(&self) -> BTreeMap<String, WsConnection> {
        self.sockets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_split_payloads_and_parse_each_part() {
        let log = Arc::new(LogStore::in_memory());
        let recorder = WsRecorder::new(Arc::clone(&log));
        recorder.on_created("ws-1", "wss://example.com/socket");
        recorder.on_frame_sent("ws-1", 1.5, "{\"op\":\"sub\"}\nplain");
        recorder.on_frame_received("ws-1", 2.0, "ok");

        let snapshot = recorder.snapshot();
        let conn = &snapshot["ws-1"];
        assert_eq!(conn.url, "wss://example.com/socket");
        assert_eq!(conn.messages.len(), 2);
        assert_eq!(conn.messages[0].io, "out");
        assert_eq!(conn.messages[0].m, vec![json!({"op": "sub"}), json!("plain")]);
        assert_eq!(conn.messages[1].io, "in");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn frames_for_unknown_sockets_are_dropped() {
        let log = Arc::new(LogStore::in_memory());
        let recorder = WsRecorder::new(log);
        recorder.on_frame_sent("ghost", 1.0, "payload");
        assert!(recorder.snapshot().is_empty());
    }
}
