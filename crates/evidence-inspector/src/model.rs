use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use evidence_log::{LogAttachment, StackFrame, TrackingHit};

/// A cookie in the final report: either observed live in the browser jar
/// at session end, or synthesized from a logged JS write that no longer
/// has a live counterpart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    /// Normalized: any leading dot is stripped before matching/grouping.
    pub domain: String,
    pub path: String,
    pub value: String,
    /// Epoch seconds; `-1` marks a session cookie.
    pub expires: f64,
    #[serde(rename = "expiresUTC", skip_serializing_if = "Option::is_none")]
    pub expires_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_days: Option<f64>,
    pub session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_party_storage: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogAttachment>,
}

impl Cookie {
    /// Builds a live-jar cookie. Derived expiry attributes are computed
    /// against the session start; domains are normalized here so matching
    /// and grouping never see a leading dot.
    pub fn live(
        name: impl Into<String>,
        domain: &str,
        path: impl Into<String>,
        value: impl Into<String>,
        expires: f64,
        start_time: DateTime<Utc>,
    ) -> Self {
        let mut cookie = Self {
            name: name.into(),
            domain: evidence_log::normalize_domain(domain),
            path: path.into(),
            value: value.into(),
            expires,
            expires_utc: None,
            expires_days: None,
            session: expires <= -1.0,
            secure: None,
            http_only: None,
            same_site: None,
            first_party_storage: None,
            log: None,
        };
        if expires > -1.0 {
            let expires_utc = DateTime::from_timestamp(expires as i64, 0).unwrap_or(start_time);
            cookie.expires_utc = Some(expires_utc);
            cookie.expires_days = Some(round_days(expires_utc - start_time));
        }
        cookie
    }
}

/// Days between two instants, rounded to two decimals.
pub(crate) fn round_days(span: chrono::Duration) -> f64 {
    (span.num_milliseconds() as f64 / (10 * 60 * 60 * 24) as f64).round() / 100.0
}

/// One local-storage entry of the live snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntry {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_party_storage: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogAttachment>,
}

/// security-origin -> storage key -> entry. Later snapshots merge into,
/// not replace, earlier ones.
pub type LocalStorageMap = BTreeMap<String, BTreeMap<String, StorageEntry>>;

/// Provenance extract attached to beacon summaries; beacons carry no event
/// type, only stack and capture time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconLog {
    pub stack: Vec<StackFrame>,
    pub timestamp: DateTime<Utc>,
}

/// One deduplicated beacon endpoint with its hit count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    #[serde(flatten)]
    pub hit: TrackingHit,
    pub log: BeaconLog,
    pub occurrences: usize,
}
