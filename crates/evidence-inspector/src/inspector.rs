//! The correlation steps. Each reads the full event list independently,
//! so steps may run in any order or be skipped; only the hosts report
//! must come last, after the other steps have populated their sets.

use std::cmp::Ordering;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use url::Url;

use evidence_log::{
    EventCookie, EventKind, LogAttachment, LogError, LogStore, Order,
};
use net_observe::{HostCategory, HostsReport, HostsTable, Party};
use party_classifier::RefPattern;

use crate::model::{round_days, Beacon, BeaconLog, Cookie, LocalStorageMap};

#[derive(Debug, Error)]
pub enum InspectError {
    /// A failing event-log query is distinct from a legitimately empty
    /// log; proceeding with an empty set would fabricate "no provenance"
    /// attributions.
    #[error("event log query failed: {0}")]
    Log(#[from] LogError),
}

pub struct Inspector {
    /// Typed events, newest first.
    events: Vec<evidence_log::Event>,
    pattern: Arc<RefPattern>,
    hosts: Arc<HostsTable>,
    /// Name of the primary tracker list; only its hits take part in the
    /// beacon host tally.
    primary_list: Option<String>,
}

impl Inspector {
    /// Reads the event log back once. Browsing has ended by the time this
    /// runs; the store sees no further writes.
    pub fn from_store(
        store: &LogStore,
        pattern: Arc<RefPattern>,
        hosts: Arc<HostsTable>,
        primary_list: Option<String>,
    ) -> Result<Self, InspectError> {
        let events = store.events(Order::Desc)?;
        debug!(target: "evidence-inspector", count = events.len(), "event log read back");
        Ok(Self {
            events,
            pattern,
            hosts,
            primary_list,
        })
    }

    /// Step 1: cookie correlation. Live cookies get provenance attached
    /// from the matching logged write; logged writes without a live
    /// counterpart are synthesized into the output (a cookie that was set,
    /// then overwritten or expired before the snapshot). Matching is by
    /// the exact `(name, domain, path)` triple; under rapid overwrite the
    /// latest logged event wins as provenance.
    pub fn inspect_cookies(&self, live: &[Cookie]) -> Vec<Cookie> {
        let mut out: Vec<Cookie> = live.to_vec();

        // Oldest first, so a later write's attachment overwrites an
        // earlier one on the same triple.
        for event in self.events.iter().rev() {
            let attachment = event.attachment();
            match &event.kind {
                EventKind::CookieJs(cookie) => {
                    self.apply_cookie_event(&mut out, cookie, &attachment)
                }
                EventKind::CookieHttp { cookies, .. } => {
                    for cookie in cookies {
                        self.apply_cookie_event(&mut out, cookie, &attachment);
                    }
                }
                _ => {}
            }
        }

        for cookie in &mut out {
            // An empty domain means the write inherited the current
            // context: first-party by convention.
            let first_party = cookie.domain.is_empty()
                || self
                    .pattern
                    .is_first_party_str(&format!("cookie://{}{}", cookie.domain, cookie.path));
            cookie.first_party_storage = Some(first_party);
            if !cookie.domain.is_empty() {
                let party = if first_party { Party::First } else { Party::Third };
                self.hosts.add(HostCategory::Cookies, party, &cookie.domain);
            }
        }

        // Longest-lived first; session cookies (expires = -1) sort last.
        out.sort_by(|a, b| b.expires.partial_cmp(&a.expires).unwrap_or(Ordering::Equal));
        out
    }

    fn apply_cookie_event(
        &self,
        out: &mut Vec<Cookie>,
        cookie: &EventCookie,
        attachment: &LogAttachment,
    ) {
        // Deletion markers carry no value and attribute nothing.
        if cookie.value.is_empty() {
            return;
        }
        if let Some(matched) = out.iter_mut().find(|c| {
            c.name == cookie.key && c.domain == cookie.domain && c.path == cookie.path
        }) {
            matched.log = Some(attachment.clone());
            return;
        }

        let expires = cookie
            .expires
            .map(|dt| dt.timestamp() as f64)
            .unwrap_or(-1.0);
        out.push(Cookie {
            name: cookie.key.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            value: cookie.value.clone(),
            expires,
            expires_utc: cookie.expires,
            expires_days: cookie.expires.map(|e| round_days(e - cookie.creation)),
            session: cookie.expires.is_none(),
            secure: Some(cookie.secure),
            http_only: Some(cookie.http_only),
            same_site: cookie.same_site.clone(),
            first_party_storage: None,
            log: Some(attachment.clone()),
        });
    }

    /// Step 2: local-storage correlation. Entries are classified by their
    /// origin and get the newest matching write event attached. No
    /// synthesis happens for storage, unlike cookies: a write without a
    /// surviving live value stays unattributed and absent from the output.
    pub fn inspect_local_storage(&self, storage: &mut LocalStorageMap) {
        for (origin, entries) in storage.iter_mut() {
            let first_party = self.pattern.is_first_party_str(origin);
            if let Some(host) = Url::parse(origin)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
            {
                let party = if first_party { Party::First } else { Party::Third };
                self.hosts.add(HostCategory::LocalStorage, party, &host);
            }

            for (key, entry) in entries.iter_mut() {
                entry.first_party_storage = Some(first_party);
                entry.log = self.events.iter().find_map(|event| match &event.kind {
                    EventKind::StorageWrite(data)
                        if event.origin.as_deref() == Some(origin.as_str())
                            && data.contains_key(key) =>
                    {
                        Some(event.attachment())
                    }
                    _ => None,
                });
            }
        }
    }

    /// Step 3: beacon correlation. Hits from the primary list feed the
    /// beacon host tally; all hits are then deduplicated per
    /// `hostname + pathname` (trailing slash stripped) into summary
    /// records counting occurrences, most frequent first.
    pub fn inspect_beacons(&self) -> Vec<Beacon> {
        let hits: Vec<(&evidence_log::TrackingHit, BeaconLog)> = self
            .events
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::TrackingHit(hit) => Some((
                    hit,
                    BeaconLog {
                        stack: event.stack.clone(),
                        timestamp: event.timestamp,
                    },
                )),
                _ => None,
            })
            .collect();

        for (hit, _) in &hits {
            let is_primary = self
                .primary_list
                .as_deref()
                .is_some_and(|primary| primary == hit.list_name);
            if !is_primary {
                continue;
            }
            if let Ok(url) = Url::parse(&hit.url) {
                if let Some(host) = url.host_str() {
                    let party = if self.pattern.is_first_party(&url) {
                        Party::First
                    } else {
                        Party::Third
                    };
                    self.hosts.add(HostCategory::Beacons, party, host);
                }
            }
        }

        // Newest hit of each endpoint is the representative record.
        let mut groups: Vec<(String, Beacon)> = Vec::new();
        for (hit, log) in hits {
            let key = Url::parse(&hit.url)
                .map(|url| {
                    format!(
                        "{}{}",
                        url.host_str().unwrap_or_default(),
                        url.path().trim_end_matches('/')
                    )
                })
                .unwrap_or_else(|_| hit.url.clone());
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, beacon)) => beacon.occurrences += 1,
                None => groups.push((
                    key,
                    Beacon {
                        hit: hit.clone(),
                        log,
                        occurrences: 1,
                    },
                )),
            }
        }

        let mut beacons: Vec<Beacon> = groups.into_iter().map(|(_, beacon)| beacon).collect();
        beacons.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        beacons
    }

    /// Step 4: converts the accumulated host sets into plain arrays. Run
    /// after steps 1-3 so their categories are populated.
    pub fn hosts_report(&self) -> HostsReport {
        self.hosts.report()
    }
}
