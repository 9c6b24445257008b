//! First-party/third-party classification against a set of reference URIs.
//!
//! The reference set (the inspected URI plus any explicitly declared
//! first-party URIs) is reduced once to a single case-insensitive pattern;
//! candidates are then classified by matching `hostname + pathname` against
//! that pattern anchored at the start. Classification happens once per
//! observed request, cookie, storage write and link, so the compiled pattern
//! is built up front and matching stays allocation-free.

use regex::{escape, RegexBuilder};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PartyError {
    #[error("reference set is empty")]
    EmptyReferenceSet,
    #[error("invalid reference uri: {0}")]
    InvalidReference(String),
    #[error("pattern compilation failed: {0}")]
    Pattern(#[from] regex::Error),
}

/// Compiled matcher for the configured reference URIs.
///
/// Each reference is reduced to `hostname + pathname` with the trailing
/// slash and any query stripped, then escaped and joined into one
/// alternation. A candidate is first-party iff its own stripped test string
/// starts with one of the references at a path-segment boundary.
#[derive(Debug, Clone)]
pub struct RefPattern {
    pattern: regex::Regex,
}

impl RefPattern {
    pub fn new(uri_refs: &[Url]) -> Result<Self, PartyError> {
        if uri_refs.is_empty() {
            return Err(PartyError::EmptyReferenceSet);
        }

        let stripped: Vec<String> = uri_refs
            .iter()
            .map(|uri| {
                let host = uri
                    .host_str()
                    .ok_or_else(|| PartyError::InvalidReference(uri.to_string()))?;
                let path = uri.path().trim_end_matches('/');
                Ok(escape(&format!("{host}{path}")))
            })
            .collect::<Result<_, PartyError>>()?;

        let pattern = RegexBuilder::new(&format!("^({})\\b", stripped.join("|")))
            .case_insensitive(true)
            .build()?;

        Ok(Self { pattern })
    }

    /// Classifies a candidate URI. Scheme, port and query are ignored; only
    /// `hostname + pathname` take part in the match.
    ///
    /// A candidate without a hostname (e.g. a same-origin JS cookie whose
    /// `Domain` attribute was never set) inherits the current context and is
    /// first-party by convention.
    pub fn is_first_party(&self, candidate: &Url) -> bool {
        let host = match candidate.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return true,
        };
        self.pattern.is_match(&format!("{host}{}", candidate.path()))
    }

    /// Convenience wrapper for callers holding a raw URI string. Unparseable
    /// candidates are third-party: they name a real remote we cannot vouch
    /// for.
    pub fn is_first_party_str(&self, candidate: &str) -> bool {
        match Url::parse(candidate) {
            Ok(url) => self.is_first_party(&url),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pattern(refs: &[&str]) -> RefPattern {
        let urls: Vec<Url> = refs.iter().map(|r| Url::parse(r).expect("ref uri")).collect();
        RefPattern::new(&urls).expect("pattern")
    }

    #[test]
    fn path_sensitive_classification() {
        let p = pattern(&["https://example.com/section"]);
        assert!(p.is_first_party(&Url::parse("https://example.com/section/page").unwrap()));
        assert!(!p.is_first_party(&Url::parse("https://example.com/other").unwrap()));
    }

    #[test]
    fn ignores_scheme_port_and_query() {
        let p = pattern(&["https://example.com/"]);
        assert!(p.is_first_party(&Url::parse("http://example.com:8080/page?q=1").unwrap()));
    }

    #[test]
    fn case_insensitive_match() {
        let p = pattern(&["https://Example.COM/About"]);
        assert!(p.is_first_party(&Url::parse("https://example.com/about/team").unwrap()));
    }

    #[test]
    fn subdomain_is_third_party() {
        let p = pattern(&["https://example.com/"]);
        assert!(!p.is_first_party(&Url::parse("https://cdn.example.com/asset.js").unwrap()));
    }

    #[test]
    fn multiple_references_form_one_alternation() {
        let p = pattern(&["https://example.com/", "https://cdn.ex.com/"]);
        assert!(p.is_first_party(&Url::parse("https://cdn.ex.com/lib.js").unwrap()));
        assert!(!p.is_first_party(&Url::parse("https://tracker.example/px").unwrap()));
    }

    #[test]
    fn empty_hostname_is_first_party() {
        let p = pattern(&["https://example.com/"]);
        assert!(p.is_first_party(&Url::parse("cookie:///some/path").unwrap()));
    }

    #[test]
    fn trailing_slash_and_query_are_stripped_from_references() {
        let p = pattern(&["https://example.com/section/?utm=1"]);
        assert!(p.is_first_party(&Url::parse("https://example.com/section").unwrap()));
    }

    #[test]
    fn empty_reference_set_is_rejected() {
        let err = RefPattern::new(&[]).unwrap_err();
        assert_eq!(err.to_string(), "reference set is empty");
    }

    #[test]
    fn unparseable_candidate_is_third_party() {
        let p = pattern(&["https://example.com/"]);
        assert!(!p.is_first_party_str("not a uri"));
    }
}
