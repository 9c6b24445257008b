//! Listeners on the outgoing-request and incoming-response streams of one
//! page session. Requests are tallied into the host classification table
//! and offered to every tracker list; responses contribute `Cookie.HTTP`
//! events for their `Set-Cookie` headers. Attribution walks up to the
//! top-level frame of the causing request, falling back to the response's
//! own URL when no frame chain resolves.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;
use url::Url;

use evidence_log::{
    json::safe_parse, normalize_domain, parse_set_cookie, Event, EventKind, LogStore, StackFrame,
    TrackingHit,
};
use party_classifier::RefPattern;

use crate::hosts::{HostCategory, HostsTable, Party};
use crate::tracker::{RequestDescriptor, TrackerMatcher};

/// Resolves frame ids against the live frame tree.
pub trait FrameResolver: Send + Sync {
    /// URL of the frame itself.
    fn frame_url(&self, frame_id: &str) -> Option<String>;
    /// URL of the top-level ancestor of the frame.
    fn top_frame_url(&self, frame_id: &str) -> Option<String>;
}

/// One outgoing request as seen by the driver.
#[derive(Clone, Debug)]
pub struct ObservedRequest {
    pub request_id: String,
    pub url: String,
    pub frame_id: Option<String>,
    pub resource_type: Option<String>,
}

/// One incoming response. `url` and `set_cookie` are optional because the
/// raw-header notification carries neither; both fall back to the request
/// recorded under the same id.
#[derive(Clone, Debug)]
pub struct ObservedResponse {
    pub request_id: String,
    pub url: Option<String>,
    /// Raw `Set-Cookie` header value; one header may bundle several
    /// cookies separated by newlines.
    pub set_cookie: Option<String>,
}

#[derive(Clone, Debug)]
struct RequestInfo {
    url: String,
    frame_id: Option<String>,
}

pub struct NetworkObserver {
    pattern: Arc<RefPattern>,
    hosts: Arc<HostsTable>,
    log: Arc<LogStore>,
    frames: Arc<dyn FrameResolver>,
    matchers: Vec<Arc<dyn TrackerMatcher>>,
    requests: DashMap<String, RequestInfo>,
}

impl NetworkObserver {
    pub fn new(
        pattern: Arc<RefPattern>,
        hosts: Arc<HostsTable>,
        log: Arc<LogStore>,
        frames: Arc<dyn FrameResolver>,
        matchers: Vec<Arc<dyn TrackerMatcher>>,
    ) -> Self {
        Self {
            pattern,
            hosts,
            log,
            frames,
            matchers,
            requests: DashMap::new(),
        }
    }

    pub fn on_request(&self, request: &ObservedRequest) {
        self.requests.insert(
            request.request_id.clone(),
            RequestInfo {
                url: request.url.clone(),
                frame_id: request.frame_id.clone(),
            },
        );

        match Url::parse(&request.url) {
            // Data URIs carry no real host and are never tallied.
            Ok(url) if url.scheme() != "data" => {
                if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
                    let party = if self.pattern.is_first_party(&url) {
                        Party::First
                    } else {
                        Party::Third
                    };
                    self.hosts.add(HostCategory::Requests, party, host);
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(target: "net-observe", url = %request.url, %err, "unparseable request url");
            }
        }

        self.match_trackers(request);
    }

    fn match_trackers(&self, request: &ObservedRequest) {
        if self.matchers.is_empty() {
            return;
        }
        let frame_url = request
            .frame_id
            .as_deref()
            .and_then(|id| self.frames.frame_url(id));
        let descriptor = RequestDescriptor {
            url: &request.url,
            resource_type: request.resource_type.as_deref(),
            frame_url: frame_url.as_deref(),
        };

        for matcher in &self.matchers {
            let Some(hit) = matcher.match_request(&descriptor) else {
                continue;
            };

            let query = Url::parse(&request.url).ok().and_then(|url| {
                let mut params = BTreeMap::new();
                for (key, value) in url.query_pairs() {
                    let parsed = if value.is_empty() {
                        Value::Null
                    } else {
                        safe_parse(&value)
                    };
                    params.insert(key.into_owned(), parsed);
                }
                (!params.is_empty()).then_some(params)
            });

            let endpoint = Url::parse(&request.url)
                .map(|url| {
                    format!(
                        "{}://{}{}",
                        url.scheme(),
                        url.host_str().unwrap_or_default(),
                        url.path()
                    )
                })
                .unwrap_or_else(|_| request.url.clone());

            let mut event = Event::new(EventKind::TrackingHit(TrackingHit {
                url: request.url.clone(),
                query,
                filter: hit.filter.clone(),
                list_name: hit.list_name.clone(),
            }));
            event.message = format!(
                "Potential Tracking Beacon captured via {} with endpoint {}.",
                hit.list_name, endpoint,
            );
            event.stack = vec![StackFrame::synthetic(
                frame_url.clone().unwrap_or_default(),
                format!(
                    "requested from {} and matched with {} filter {}",
                    frame_url.as_deref().unwrap_or("undefined source"),
                    hit.list_name,
                    hit.filter,
                ),
            )];

            warn!(target: "net-observe", "{}", event.message);
            self.log.append(event);
        }
    }

    pub fn on_response(&self, response: &ObservedResponse) {
        let Some(header) = response.set_cookie.as_deref() else {
            return;
        };

        let info = self
            .requests
            .get(&response.request_id)
            .map(|r| r.value().clone());
        let response_url = response
            .url
            .clone()
            .or_else(|| info.as_ref().map(|i| i.url.clone()));
        let Some(response_url) = response_url else {
            self.log.notice(
                evidence_log::LogLevel::Warn,
                "Browser",
                format!(
                    "Set-Cookie header observed for unknown request {}.",
                    response.request_id
                ),
            );
            return;
        };

        let (domain, browsed_path) = match Url::parse(&response_url) {
            Ok(url) => (
                normalize_domain(url.host_str().unwrap_or_default()),
                url.path().to_string(),
            ),
            Err(_) => (String::new(), "/".to_string()),
        };

        let now = chrono::Utc::now();
        let mut cookies = Vec::new();
        let mut malformed = Vec::new();
        for line in header.split('\n').filter(|line| !line.trim().is_empty()) {
            match parse_set_cookie(line) {
                Some(parsed) => cookies.push(parsed.resolve(&domain, &browsed_path, now)),
                None => malformed.push(line.to_string()),
            }
        }

        let mut messages = vec![format!(
            "{} Cookie(s) (HTTP) set for host {}{}{}.",
            cookies.len(),
            domain,
            if cookies.is_empty() { "" } else { " with key(s) " },
            cookies
                .iter()
                .map(|c| c.key.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )];
        if !malformed.is_empty() {
            messages.push(format!(
                "{} invalid cookie header(s) set for host {}: \"{}\".",
                malformed.len(),
                domain,
                malformed.join(", "),
            ));
        }

        // Attribute to the top-level frame of the request; fall back to the
        // response's own URL when the frame chain cannot be resolved.
        let location = info
            .as_ref()
            .and_then(|i| i.frame_id.as_deref())
            .and_then(|id| self.frames.top_frame_url(id))
            .unwrap_or_else(|| response_url.clone());

        let mut event = Event::new(EventKind::CookieHttp { cookies, malformed });
        event.message = messages.join(" ");
        event.location = Some(location);
        event.raw = Some(Value::String(header.to_string()));
        event.stack = vec![StackFrame::synthetic(
            response_url.clone(),
            format!("set in Set-Cookie HTTP response header for {response_url}"),
        )];

        warn!(target: "net-observe", "{}", event.message);
        self.log.append(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::RuleList;
    use evidence_log::Order;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct FakeFrames {
        urls: HashMap<String, String>,
        tops: HashMap<String, String>,
    }

    impl FrameResolver for FakeFrames {
        fn frame_url(&self, frame_id: &str) -> Option<String> {
            self.urls.get(frame_id).cloned()
        }
        fn top_frame_url(&self, frame_id: &str) -> Option<String> {
            self.tops.get(frame_id).cloned()
        }
    }

    fn observer(matchers: Vec<Arc<dyn TrackerMatcher>>) -> (NetworkObserver, Arc<LogStore>, Arc<HostsTable>) {
        let pattern = Arc::new(
            RefPattern::new(&[Url::parse("https://example.com/").expect("ref")]).expect("pattern"),
        );
        let hosts = Arc::new(HostsTable::new());
        let log = Arc::new(LogStore::in_memory());
        let frames = Arc::new(FakeFrames {
            urls: HashMap::from([("frame-1".to_string(), "https://example.com/page".to_string())]),
            tops: HashMap::from([("frame-1".to_string(), "https://example.com/".to_string())]),
        });
        let observer = NetworkObserver::new(
            pattern,
            Arc::clone(&hosts),
            Arc::clone(&log),
            frames,
            matchers,
        );
        (observer, log, hosts)
    }

    fn request(id: &str, url: &str) -> ObservedRequest {
        ObservedRequest {
            request_id: id.to_string(),
            url: url.to_string(),
            frame_id: Some("frame-1".to_string()),
            resource_type: None,
        }
    }

    #[test]
    fn requests_are_classified_by_party() {
        let (observer, _log, hosts) = observer(vec![]);
        observer.on_request(&request("1", "https://example.com/app.js"));
        observer.on_request(&request("2", "https://tracker.example/px"));

        let report = hosts.report();
        assert_eq!(report.requests.first_party, vec!["example.com"]);
        assert_eq!(report.requests.third_party, vec!["tracker.example"]);
    }

    #[test]
    fn data_uris_are_never_counted() {
        let (observer, _log, hosts) = observer(vec![]);
        observer.on_request(&request("1", "data:text/html,<p>x</p>"));

        let report = hosts.report();
        assert!(report.requests.first_party.is_empty());
        assert!(report.requests.third_party.is_empty());
    }

    #[test]
    fn bundled_set_cookie_header_becomes_one_event() {
        let (observer, log, _hosts) = observer(vec![]);
        observer.on_request(&request("1", "https://example.com/login"));
        observer.on_response(&ObservedResponse {
            request_id: "1".to_string(),
            url: Some("https://example.com/login".to_string()),
            set_cookie: Some("x=1\ny=2".to_string()),
        });

        let events = log.events(Order::Desc).expect("events");
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::CookieHttp { cookies, malformed } => {
                assert_eq!(cookies.len(), 2);
                assert_eq!(cookies[0].key, "x");
                assert_eq!(cookies[1].key, "y");
                assert_eq!(cookies[0].domain, "example.com");
                assert!(malformed.is_empty());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        // Both cookies attributed to the same top-frame location.
        assert_eq!(events[0].location.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn malformed_header_lines_are_kept_with_a_count() {
        let (observer, log, _hosts) = observer(vec![]);
        observer.on_response(&ObservedResponse {
            request_id: "9".to_string(),
            url: Some("https://example.com/".to_string()),
            set_cookie: Some("valid=1\ngarbage".to_string()),
        });

        let events = log.events(Order::Desc).expect("events");
        match &events[0].kind {
            EventKind::CookieHttp { cookies, malformed } => {
                assert_eq!(cookies.len(), 1);
                assert_eq!(malformed, &vec!["garbage".to_string()]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(events[0].message.contains("1 invalid cookie header(s)"));
    }

    #[test]
    fn response_location_falls_back_to_its_own_url() {
        let (observer, log, _hosts) = observer(vec![]);
        observer.on_response(&ObservedResponse {
            request_id: "unseen".to_string(),
            url: Some("https://cdn.example/resource".to_string()),
            set_cookie: Some("a=1".to_string()),
        });

        let events = log.events(Order::Desc).expect("events");
        assert_eq!(
            events[0].location.as_deref(),
            Some("https://cdn.example/resource")
        );
    }

    #[test]
    fn http_cookie_path_defaults_from_the_response_url() {
        let (observer, log, _hosts) = observer(vec![]);
        observer.on_response(&ObservedResponse {
            request_id: "1".to_string(),
            url: Some("https://example.com/shop/cart".to_string()),
            set_cookie: Some("a=1".to_string()),
        });

        let events = log.events(Order::Desc).expect("events");
        match &events[0].kind {
            EventKind::CookieHttp { cookies, .. } => {
                assert_eq!(cookies[0].path, "/shop");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn tracker_hits_append_tracking_events() {
        let list: Arc<dyn TrackerMatcher> =
            Arc::new(RuleList::parse("easyprivacy.txt", "||tracker.example^"));
        let (observer, log, _hosts) = observer(vec![list]);
        observer.on_request(&request("1", "https://tracker.example/px?x=1&blob=%7B%22a%22%3A1%7D"));

        let events = log.events(Order::Desc).expect("events");
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::TrackingHit(hit) => {
                assert_eq!(hit.list_name, "easyprivacy.txt");
                let query = hit.query.as_ref().expect("query");
                assert_eq!(query["x"], serde_json::json!(1));
                assert_eq!(query["blob"], serde_json::json!({"a": 1}));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(events[0].message.contains("https://tracker.example/px"));
        let frame = &events[0].stack[0];
        assert_eq!(frame.file_name.as_deref(), Some("https://example.com/page"));
    }
}
