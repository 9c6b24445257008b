use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cookie::EventCookie;

/// Severity attached to a stored event. Evidence events are recorded at
/// `Warn`: they are findings for a human auditor, not errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// One frame of the call stack captured at an interception point.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl StackFrame {
    /// Synthetic frame for events without a JS stack (HTTP cookies,
    /// tracking requests), pointing at the causing URL instead.
    pub fn synthetic(file_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            source: Some(source.into()),
            ..Self::default()
        }
    }
}

/// A tracking-beacon hit as matched by a tracker rule list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingHit {
    pub url: String,
    pub query: Option<BTreeMap<String, Value>>,
    pub filter: String,
    pub list_name: String,
}

/// Typed payload of an event. Normalization in the reporter bridge and the
/// network observer maps every raw capture into exactly one of these; the
/// inspector matches on them exhaustively.
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// A `document.cookie` write intercepted inside the page.
    CookieJs(EventCookie),
    /// All cookies of one `Set-Cookie` response header, plus the raw text
    /// of any lines that did not parse.
    CookieHttp {
        cookies: Vec<EventCookie>,
        malformed: Vec<String>,
    },
    /// A local-storage write; values are parsed JSON or the raw string.
    StorageWrite(BTreeMap<String, Value>),
    /// An outgoing request matched against a tracker rule list.
    TrackingHit(TrackingHit),
    /// Browser-level notices (console output, navigation info, websocket
    /// opens, collection anomalies). The label is the free-form type.
    Other { label: String, payload: Value },
}

impl EventKind {
    pub fn type_name(&self) -> &str {
        match self {
            EventKind::CookieJs(_) => "Cookie.JS",
            EventKind::CookieHttp { .. } => "Cookie.HTTP",
            EventKind::StorageWrite(_) => "Storage.LocalStorage",
            EventKind::TrackingHit(_) => "Request.Tracking",
            EventKind::Other { label, .. } => label,
        }
    }

    /// Payload as written to the ndjson audit record.
    pub fn payload_value(&self) -> Value {
        match self {
            EventKind::CookieJs(cookie) => serde_json::to_value(cookie).unwrap_or(Value::Null),
            EventKind::CookieHttp { cookies, malformed } => serde_json::json!({
                "cookies": cookies,
                "malformed": malformed,
            }),
            EventKind::StorageWrite(entries) => {
                serde_json::to_value(entries).unwrap_or(Value::Null)
            }
            EventKind::TrackingHit(hit) => serde_json::to_value(hit).unwrap_or(Value::Null),
            EventKind::Other { payload, .. } => payload.clone(),
        }
    }
}

/// The atomic unit of the causal record. Immutable once appended.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Security origin of the writing context (frame-local).
    pub origin: Option<String>,
    /// Browsed location the event is attributed to; for framed content the
    /// top-level browsing context when determinable.
    pub location: Option<String>,
    /// Frames immediately above the interception point, interceptor frame
    /// already trimmed.
    pub stack: Vec<StackFrame>,
    /// Unparsed capture (raw cookie string, raw storage map, raw header).
    pub raw: Option<Value>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Warn,
            message: String::new(),
            origin: None,
            location: None,
            stack: Vec::new(),
            raw: None,
            kind,
        }
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Provenance extract attached to correlated output entities.
    pub fn attachment(&self) -> LogAttachment {
        LogAttachment {
            stack: self.stack.clone(),
            event_type: Some(self.type_name().to_string()),
            timestamp: self.timestamp,
            location: self.location.clone(),
        }
    }
}

/// The `log` metadata attached to a cookie, storage entry or beacon once
/// the inspector has matched it against the causal record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAttachment {
    pub stack: Vec<StackFrame>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_cover_all_kinds() {
        let cookie = EventCookie {
            key: "a".into(),
            value: "1".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires: None,
            creation: Utc::now(),
            secure: false,
            http_only: false,
            same_site: None,
        };
        assert_eq!(EventKind::CookieJs(cookie.clone()).type_name(), "Cookie.JS");
        assert_eq!(
            EventKind::CookieHttp {
                cookies: vec![cookie],
                malformed: vec![],
            }
            .type_name(),
            "Cookie.HTTP"
        );
        assert_eq!(
            EventKind::StorageWrite(BTreeMap::new()).type_name(),
            "Storage.LocalStorage"
        );
        assert_eq!(
            EventKind::Other {
                label: "Browser".into(),
                payload: Value::Null,
            }
            .type_name(),
            "Browser"
        );
    }
}
