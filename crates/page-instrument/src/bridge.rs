//! Host side of the instrumentation channel. The page calls the exposed
//! binding with a JSON payload; the bridge normalizes it into a typed
//! [`Event`] and appends it to the session log store. Malformed payloads
//! degrade to best-effort raw capture and never propagate a failure back
//! into the page.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::Url;

use evidence_log::{
    json::safe_parse, parse_set_cookie, Event, EventKind, LogStore, StackFrame,
};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("undecodable page payload: {0}")]
    Payload(String),
}

/// Raw payload shape produced by the injected interceptor.
#[derive(Debug, Deserialize)]
struct PagePayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    stack: Vec<StackFrame>,
    data: Value,
    location: PageLocation,
}

#[derive(Debug, Deserialize)]
struct PageLocation {
    href: String,
    origin: String,
    hostname: String,
    #[serde(default)]
    ancestor: Option<String>,
}

pub struct Bridge {
    log: Arc<LogStore>,
}

impl Bridge {
    pub fn new(log: Arc<LogStore>) -> Self {
        Self { log }
    }

    /// Entry point for `Runtime.bindingCalled` payloads.
    pub fn report_event(&self, payload: &str) -> Result<(), BridgeError> {
        let payload: PagePayload =
            serde_json::from_str(payload).map_err(|err| BridgeError::Payload(err.to_string()))?;

        // Writes inside nested frames are attributed to the top document
        // when the frame chain exposes it.
        let browsed_location = payload
            .location
            .ancestor
            .clone()
            .unwrap_or_else(|| payload.location.href.clone());

        // Frame 0 is the interceptor's own wrapper; keep the direct caller
        // and its caller.
        let stack: Vec<StackFrame> = payload.stack.into_iter().skip(1).take(2).collect();

        let mut event = match payload.kind.as_str() {
            "Cookie.JS" => {
                let raw = payload.data.as_str().unwrap_or_default().to_string();
                match parse_set_cookie(&raw) {
                    Some(parsed) => {
                        let browsed_path = Url::parse(&browsed_location)
                            .map(|url| url.path().to_string())
                            .unwrap_or_else(|_| "/".to_string());
                        let cookie = parsed.resolve(
                            &payload.location.hostname,
                            &browsed_path,
                            chrono::Utc::now(),
                        );
                        let mut event = Event::new(EventKind::CookieJs(cookie.clone()));
                        event.message = format!(
                            "{} Cookie (JS) set for host {} with key {}.",
                            if cookie.expires.is_some() { "Persistent" } else { "Session" },
                            cookie.domain,
                            cookie.key,
                        );
                        event.raw = Some(Value::String(raw));
                        event
                    }
                    None => {
                        let mut event = Event::new(EventKind::Other {
                            label: "Browser".to_string(),
                            payload: serde_json::json!({ "raw": raw.clone() }),
                        });
                        event.message = format!(
                            "Invalid cookie string set by JS for host {}: \"{raw}\".",
                            payload.location.hostname,
                        );
                        event.raw = Some(Value::String(raw));
                        event
                    }
                }
            }
            "Storage.LocalStorage" => {
                let mut entries = BTreeMap::new();
                if let Value::Object(map) = &payload.data {
                    for (key, value) in map {
                        let parsed = match value {
                            Value::String(text) => safe_parse(text),
                            other => other.clone(),
                        };
                        entries.insert(key.clone(), parsed);
                    }
                }
                let keys: Vec<&str> = entries.keys().map(String::as_str).collect();
                let mut event = Event::new(EventKind::StorageWrite(entries.clone()));
                event.message = format!(
                    "LocalStorage filled with key(s) {} for origin {}.",
                    keys.join(", "),
                    payload.location.origin,
                );
                event.raw = Some(payload.data.clone());
                event
            }
            other => Event::new(EventKind::Other {
                label: other.to_string(),
                payload: payload.data.clone(),
            }),
        };

        event.stack = stack;
        event.origin = Some(payload.location.origin);
        event.location = Some(browsed_location);

        warn!(target: "page-instrument", event_type = event.type_name(), "{}", event.message);
        self.log.append(event);
        Ok(())
    }
}
