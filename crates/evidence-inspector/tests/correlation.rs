//! End-to-end correlation tests: a synthetic event log plus a live state
//! snapshot go in, attributed and classified output comes out.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;

use evidence_inspector::{Cookie, Inspector, LocalStorageMap, StorageEntry};
use evidence_log::{
    Event, EventCookie, EventKind, LogStore, StackFrame, TrackingHit,
};
use net_observe::HostsTable;
use party_classifier::RefPattern;

fn pattern(refs: &[&str]) -> Arc<RefPattern> {
    let urls: Vec<Url> = refs.iter().map(|r| Url::parse(r).expect("ref")).collect();
    Arc::new(RefPattern::new(&urls).expect("pattern"))
}

fn event_cookie(key: &str, value: &str, domain: &str, path: &str) -> EventCookie {
    EventCookie {
        key: key.to_string(),
        value: value.to_string(),
        domain: domain.to_string(),
        path: path.to_string(),
        expires: None,
        creation: Utc::now(),
        secure: false,
        http_only: false,
        same_site: None,
    }
}

fn cookie_event(cookie: EventCookie, location: &str) -> Event {
    let mut event = Event::new(EventKind::CookieJs(cookie));
    event.location = Some(location.to_string());
    event.stack = vec![StackFrame::synthetic(location, "test frame")];
    event
}

fn tracking_event(url: &str, list: &str) -> Event {
    Event::new(EventKind::TrackingHit(TrackingHit {
        url: url.to_string(),
        query: None,
        filter: "||tracker.example^".to_string(),
        list_name: list.to_string(),
    }))
}

fn inspector(store: &LogStore, refs: &[&str]) -> Inspector {
    Inspector::from_store(
        store,
        pattern(refs),
        Arc::new(HostsTable::new()),
        Some("easyprivacy.txt".to_string()),
    )
    .expect("inspector")
}

#[test]
fn live_cookie_gets_provenance_from_matching_event() {
    let store = LogStore::in_memory();
    store.append(cookie_event(
        event_cookie("sid", "abc", "example.com", "/"),
        "https://example.com/",
    ));

    let start = Utc::now();
    let live = vec![Cookie::live("sid", "example.com", "/", "abc", -1.0, start)];

    let inspector = inspector(&store, &["https://example.com/"]);
    let cookies = inspector.inspect_cookies(&live);

    assert_eq!(cookies.len(), 1);
    let log = cookies[0].log.as_ref().expect("log attached");
    assert_eq!(log.event_type.as_deref(), Some("Cookie.JS"));
    assert_eq!(cookies[0].first_party_storage, Some(true));
}

#[test]
fn rapid_overwrite_keeps_the_latest_event_as_provenance() {
    // Page sets `a=1`, later `a=2; domain=example.com`; both events share
    // the match key (a, example.com, /). The second one must win.
    let store = LogStore::in_memory();
    store.append(cookie_event(
        event_cookie("a", "1", "example.com", "/"),
        "https://example.com/first",
    ));
    store.append(cookie_event(
        event_cookie("a", "2", "example.com", "/"),
        "https://example.com/second",
    ));

    let start = Utc::now();
    let live = vec![Cookie::live("a", "example.com", "/", "2", -1.0, start)];

    let inspector = inspector(&store, &["https://example.com/"]);
    let cookies = inspector.inspect_cookies(&live);

    // Both events matched the one live cookie; nothing is synthesized and
    // the later write's metadata sticks.
    assert_eq!(cookies.len(), 1);
    assert_eq!(
        cookies[0].log.as_ref().expect("log").location.as_deref(),
        Some("https://example.com/second"),
    );
}

#[test]
fn unmatched_events_synthesize_cookies() {
    // A cookie set by JS and cleared before the snapshot still appears in
    // the output, flagged as a session cookie when no expiry was present.
    let store = LogStore::in_memory();
    store.append(cookie_event(
        event_cookie("ghost", "gone", "example.com", "/"),
        "https://example.com/",
    ));

    let inspector = inspector(&store, &["https://example.com/"]);
    let cookies = inspector.inspect_cookies(&[]);

    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].name, "ghost");
    assert!(cookies[0].session);
    assert_eq!(cookies[0].expires, -1.0);
    assert!(cookies[0].log.is_some());
}

#[test]
fn synthesized_cookie_derives_expiry_days() {
    let now = Utc::now();
    let mut cookie = event_cookie("keep", "v", "example.com", "/");
    cookie.creation = now;
    cookie.expires = Some(now + Duration::days(30));

    let store = LogStore::in_memory();
    store.append(cookie_event(cookie, "https://example.com/"));

    let inspector = inspector(&store, &["https://example.com/"]);
    let cookies = inspector.inspect_cookies(&[]);

    assert!(!cookies[0].session);
    assert_eq!(cookies[0].expires_days, Some(30.0));
}

#[test]
fn deletion_markers_are_discarded() {
    let store = LogStore::in_memory();
    store.append(cookie_event(
        event_cookie("gone", "", "example.com", "/"),
        "https://example.com/",
    ));

    let inspector = inspector(&store, &["https://example.com/"]);
    let cookies = inspector.inspect_cookies(&[]);
    assert!(cookies.is_empty());
}

#[test]
fn cookie_correlation_is_idempotent() {
    let store = LogStore::in_memory();
    store.append(cookie_event(
        event_cookie("sid", "abc", "example.com", "/"),
        "https://example.com/",
    ));
    store.append(cookie_event(
        event_cookie("ghost", "gone", "other.example", "/"),
        "https://other.example/",
    ));

    let start = Utc::now();
    let live = vec![Cookie::live("sid", "example.com", "/", "abc", -1.0, start)];

    let inspector = inspector(&store, &["https://example.com/"]);
    let first = inspector.inspect_cookies(&live);
    let second = inspector.inspect_cookies(&live);
    assert_eq!(first, second);
}

#[test]
fn cookies_sort_by_expiry_with_session_cookies_last() {
    let now = Utc::now();
    let start = Utc::now();
    let mut persistent = event_cookie("long", "v", "example.com", "/");
    persistent.expires = Some(now + Duration::days(365));

    let store = LogStore::in_memory();
    store.append(cookie_event(persistent, "https://example.com/"));

    let live = vec![
        Cookie::live("session", "example.com", "/", "s", -1.0, start),
        Cookie::live(
            "short",
            "example.com",
            "/",
            "v",
            (now + Duration::days(1)).timestamp() as f64,
            start,
        ),
    ];

    let inspector = inspector(&store, &["https://example.com/"]);
    let cookies = inspector.inspect_cookies(&live);
    let names: Vec<&str> = cookies.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["long", "short", "session"]);
}

#[test]
fn third_party_cookie_domains_are_classified_path_sensitively() {
    let store = LogStore::in_memory();
    let start = Utc::now();
    let live = vec![
        Cookie::live("first", "example.com", "/section/sub", "v", -1.0, start),
        Cookie::live("third", "example.com", "/other", "v", -1.0, start),
        Cookie::live("tracker", "tracker.example", "/", "v", -1.0, start),
    ];

    let inspector = inspector(&store, &["https://example.com/section"]);
    let cookies = inspector.inspect_cookies(&live);

    let by_name = |name: &str| {
        cookies
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.first_party_storage)
    };
    assert_eq!(by_name("first"), Some(true));
    assert_eq!(by_name("third"), Some(false));
    assert_eq!(by_name("tracker"), Some(false));

    let hosts = inspector.hosts_report();
    assert_eq!(hosts.cookies.first_party, vec!["example.com"]);
    assert_eq!(
        hosts.cookies.third_party,
        vec!["example.com", "tracker.example"]
    );
}

#[test]
fn storage_entries_attach_the_newest_matching_write() {
    let store = LogStore::in_memory();

    let mut entries = BTreeMap::new();
    entries.insert("k".to_string(), json!({"a": 1}));
    let mut event = Event::new(EventKind::StorageWrite(entries.clone()));
    event.origin = Some("https://example.com".to_string());
    event.location = Some("https://example.com/old".to_string());
    store.append(event);

    let mut newer = Event::new(EventKind::StorageWrite(entries));
    newer.origin = Some("https://example.com".to_string());
    newer.location = Some("https://example.com/new".to_string());
    store.append(newer);

    let mut storage: LocalStorageMap = BTreeMap::new();
    storage.entry("https://example.com".to_string()).or_default().insert(
        "k".to_string(),
        StorageEntry {
            value: json!({"a": 1}),
            first_party_storage: None,
            log: None,
        },
    );
    storage.entry("https://cdn.other.example".to_string()).or_default().insert(
        "orphan".to_string(),
        StorageEntry {
            value: json!("x"),
            first_party_storage: None,
            log: None,
        },
    );

    let inspector = inspector(&store, &["https://example.com/"]);
    inspector.inspect_local_storage(&mut storage);

    let entry = &storage["https://example.com"]["k"];
    assert_eq!(entry.first_party_storage, Some(true));
    assert_eq!(
        entry.log.as_ref().expect("log").location.as_deref(),
        Some("https://example.com/new"),
    );

    // No synthesis for storage: the orphan stays unattributed.
    let orphan = &storage["https://cdn.other.example"]["orphan"];
    assert_eq!(orphan.first_party_storage, Some(false));
    assert!(orphan.log.is_none());

    let hosts = inspector.hosts_report();
    assert_eq!(hosts.local_storage.first_party, vec!["example.com"]);
    assert_eq!(hosts.local_storage.third_party, vec!["cdn.other.example"]);
}

#[test]
fn beacons_deduplicate_by_endpoint_and_count_occurrences() {
    let store = LogStore::in_memory();
    for x in 0..5 {
        store.append(tracking_event(
            &format!("https://tracker.example/px?x={x}"),
            "easyprivacy.txt",
        ));
    }
    store.append(tracking_event(
        "https://other.example/collect",
        "easyprivacy.txt",
    ));

    let inspector = inspector(&store, &["https://example.com/"]);
    let beacons = inspector.inspect_beacons();

    assert_eq!(beacons.len(), 2);
    assert_eq!(beacons[0].occurrences, 5);
    assert!(beacons[0].hit.url.starts_with("https://tracker.example/px"));
    assert_eq!(beacons[1].occurrences, 1);

    let hosts = inspector.hosts_report();
    assert_eq!(
        hosts.beacons.third_party,
        vec!["other.example", "tracker.example"]
    );
}

#[test]
fn trailing_slash_does_not_split_beacon_groups() {
    let store = LogStore::in_memory();
    store.append(tracking_event("https://tracker.example/px/", "easyprivacy.txt"));
    store.append(tracking_event("https://tracker.example/px", "easyprivacy.txt"));

    let inspector = inspector(&store, &["https://example.com/"]);
    let beacons = inspector.inspect_beacons();
    assert_eq!(beacons.len(), 1);
    assert_eq!(beacons[0].occurrences, 2);
}

#[test]
fn secondary_list_hits_stay_out_of_the_host_tally() {
    let store = LogStore::in_memory();
    store.append(tracking_event(
        "https://annoyance.example/banner",
        "fanboy-annoyance.txt",
    ));

    let inspector = inspector(&store, &["https://example.com/"]);
    let beacons = inspector.inspect_beacons();

    // The hit still appears in the summary...
    assert_eq!(beacons.len(), 1);
    // ...but does not contribute to the first/third-party beacon hosts.
    let hosts = inspector.hosts_report();
    assert!(hosts.beacons.first_party.is_empty());
    assert!(hosts.beacons.third_party.is_empty());
}
