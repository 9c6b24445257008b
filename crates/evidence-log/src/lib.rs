//! Evidence event model and the append-only session log store.
//!
//! Every privacy-relevant side effect observed during a browsing session
//! (JS cookie writes, Set-Cookie response headers, local-storage writes,
//! tracking-beacon hits, browser-level notices) becomes one [`Event`]
//! appended here, tagged with its causal stack and capture time. The store
//! is the causal record the post-session inspector correlates against, and
//! doubles as the on-disk audit artifact (`inspection-log.ndjson`).

pub mod cookie;
pub mod errors;
pub mod json;
pub mod model;
pub mod store;

pub use cookie::{default_path, normalize_domain, parse_set_cookie, EventCookie, ParsedCookie};
pub use errors::LogError;
pub use json::safe_parse;
pub use model::{Event, EventKind, LogAttachment, LogLevel, StackFrame, TrackingHit};
pub use store::{LogStore, Order};
