//! Tracker rule-list matching boundary. The collector treats the matcher
//! as an external collaborator: one trait, consulted once per outgoing
//! request for each independently loaded list. [`RuleList`] is the bundled
//! adapter understanding the common filter-list idioms (host anchors and
//! plain URL substrings); the first configured list is the primary one,
//! the only list whose hits take part in the first/third-party host tally.

use url::Url;

/// Description of one outgoing request as offered to matchers.
#[derive(Clone, Debug)]
pub struct RequestDescriptor<'a> {
    pub url: &'a str,
    pub resource_type: Option<&'a str>,
    pub frame_url: Option<&'a str>,
}

/// A positive match, carrying the rule that fired and its list.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerMatch {
    pub filter: String,
    pub list_name: String,
}

pub trait TrackerMatcher: Send + Sync {
    fn list_name(&self) -> &str;
    fn match_request(&self, request: &RequestDescriptor<'_>) -> Option<TrackerMatch>;
}

enum Rule {
    /// `||example.com^` - matches the host and all its subdomains.
    HostAnchor(String),
    /// Anything else - matched as a URL substring, `^` treated as the end
    /// of the matchable part.
    Substring(String),
}

/// Filter-list adapter. Comment lines (`!`), cosmetic rules (`##`) and
/// exception rules (`@@`) are skipped; everything else becomes a network
/// rule. Rule options after `$` are ignored - the match decision here is
/// per-URL, not per-context.
pub struct RuleList {
    name: String,
    rules: Vec<(Rule, String)>,
}

impl RuleList {
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut rules = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with("@@") {
                continue;
            }
            if line.contains("##") || line.contains("#@#") {
                continue;
            }
            let original = line.to_string();
            let body = line.split('$').next().unwrap_or(line);
            let rule = if let Some(anchored) = body.strip_prefix("||") {
                let host = anchored
                    .split(['^', '/'])
                    .next()
                    .unwrap_or(anchored)
                    .to_ascii_lowercase();
                if host.is_empty() {
                    continue;
                }
                Rule::HostAnchor(host)
            } else {
                let needle = body.trim_end_matches('^').to_string();
                if needle.is_empty() {
                    continue;
                }
                Rule::Substring(needle)
            };
            rules.push((rule, original));
        }
        Self {
            name: name.into(),
            rules,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TrackerMatcher for RuleList {
    fn list_name(&self) -> &str {
        &self.name
    }

    fn match_request(&self, request: &RequestDescriptor<'_>) -> Option<TrackerMatch> {
        let host = Url::parse(request.url)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.to_ascii_lowercase()));
        for (rule, original) in &self.rules {
            let hit = match rule {
                Rule::HostAnchor(anchor) => host.as_deref().is_some_and(|host| {
                    host == anchor || host.ends_with(&format!(".{anchor}"))
                }),
                Rule::Substring(needle) => request.url.contains(needle.as_str()),
            };
            if hit {
                return Some(TrackerMatch {
                    filter: original.clone(),
                    list_name: self.name.clone(),
                });
            }
        }
        None
    }
}
