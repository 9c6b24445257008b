//! Cookie parsing and normalization.
//!
//! Parses `Set-Cookie`-style strings (both JS `document.cookie` writes and
//! HTTP response headers travel through here) into [`ParsedCookie`], then
//! resolves the defaults a user agent would apply: a missing `Domain`
//! attribute inherits the setting host, a missing `Path` follows the
//! RFC 6265 default-path algorithm relative to the browsed path.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A cookie as parsed from a raw `Set-Cookie` string, before defaults are
/// resolved. `domain` and `path` stay `None` when the attribute was absent.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedCookie {
    pub key: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

/// A cookie carried inside a logged event, with domain and path resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCookie {
    pub key: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub creation: DateTime<Utc>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl ParsedCookie {
    /// Resolves defaults against the setting context. `Max-Age` takes
    /// precedence over `Expires` when both are present.
    pub fn resolve(self, default_domain: &str, browsed_path: &str, now: DateTime<Utc>) -> EventCookie {
        let expires = match self.max_age {
            Some(seconds) => Some(now + Duration::seconds(seconds)),
            None => self.expires,
        };
        EventCookie {
            key: self.key,
            value: self.value,
            domain: self
                .domain
                .map(|d| normalize_domain(&d))
                .unwrap_or_else(|| default_domain.to_string()),
            path: self.path.unwrap_or_else(|| default_path(browsed_path)),
            expires,
            creation: now,
            secure: self.secure,
            http_only: self.http_only,
            same_site: self.same_site,
        }
    }
}

/// Strips the leading dot user agents accept in `Domain` attributes. All
/// matching and grouping happens on the normalized form.
pub fn normalize_domain(domain: &str) -> String {
    domain
        .strip_prefix('.')
        .unwrap_or(domain)
        .to_ascii_lowercase()
}

/// RFC 6265 §5.1.4 default-path: everything up to (excluding) the last `/`
/// of the browsed path, or `/` when that leaves nothing.
pub fn default_path(browsed_path: &str) -> String {
    if !browsed_path.starts_with('/') {
        return "/".to_string();
    }
    match browsed_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => browsed_path[..idx].to_string(),
    }
}

/// Parses one `Set-Cookie`-style line. Returns `None` when the line has no
/// `name=value` pair to offer; such lines are still kept as raw evidence by
/// the caller, with a warning count.
pub fn parse_set_cookie(raw: &str) -> Option<ParsedCookie> {
    let mut parts = raw.split(';');

    let pair = parts.next()?.trim();
    let eq = pair.find('=')?;
    let key = pair[..eq].trim().to_string();
    if key.is_empty() {
        return None;
    }
    let value = pair[eq + 1..].trim().to_string();

    let mut cookie = ParsedCookie {
        key,
        value,
        domain: None,
        path: None,
        expires: None,
        max_age: None,
        secure: false,
        http_only: false,
        same_site: None,
    };

    for attr in parts {
        let attr = attr.trim();
        let (name, val) = match attr.split_once('=') {
            Some((name, val)) => (name.trim(), Some(val.trim())),
            None => (attr, None),
        };
        match name.to_ascii_lowercase().as_str() {
            "domain" => {
                if let Some(val) = val.filter(|v| !v.is_empty()) {
                    cookie.domain = Some(val.to_string());
                }
            }
            "path" => {
                if let Some(val) = val.filter(|v| v.starts_with('/')) {
                    cookie.path = Some(val.to_string());
                }
            }
            "expires" => {
                cookie.expires = val.and_then(parse_cookie_date);
            }
            "max-age" => {
                cookie.max_age = val.and_then(|v| v.parse::<i64>().ok());
            }
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" => cookie.same_site = val.map(|v| v.to_string()),
            _ => {}
        }
    }

    Some(cookie)
}

// Cookie dates appear in RFC 1123 form and a handful of legacy variants
// with two-digit years or dashes between date fields.
fn parse_cookie_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    const LEGACY_FORMATS: &[&str] = &[
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ];
    for format in LEGACY_FORMATS {
        if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(parsed, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_bare_pair() {
        let cookie = parse_set_cookie("a=1").expect("cookie");
        assert_eq!(cookie.key, "a");
        assert_eq!(cookie.value, "1");
        assert_eq!(cookie.domain, None);
        assert_eq!(cookie.path, None);
        assert_eq!(cookie.expires, None);
    }

    #[test]
    fn parses_attributes() {
        let cookie = parse_set_cookie(
            "sid=abc; Domain=.Example.com; Path=/app; Secure; HttpOnly; SameSite=Lax",
        )
        .expect("cookie");
        assert_eq!(cookie.domain.as_deref(), Some(".Example.com"));
        assert_eq!(cookie.path.as_deref(), Some("/app"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
    }

    #[test]
    fn rejects_lines_without_a_pair() {
        assert_eq!(parse_set_cookie("garbage"), None);
        assert_eq!(parse_set_cookie("=orphan"), None);
        assert_eq!(parse_set_cookie(""), None);
    }

    #[test]
    fn value_may_contain_equals() {
        let cookie = parse_set_cookie("token=a=b=c").expect("cookie");
        assert_eq!(cookie.value, "a=b=c");
    }

    #[test]
    fn missing_domain_defaults_to_setting_host() {
        let now = Utc::now();
        let cookie = parse_set_cookie("a=1")
            .expect("cookie")
            .resolve("example.com", "/section/page", now);
        assert_eq!(cookie.domain, "example.com");
    }

    #[test]
    fn explicit_domain_is_normalized() {
        let now = Utc::now();
        let cookie = parse_set_cookie("a=1; domain=.Example.COM")
            .expect("cookie")
            .resolve("other.test", "/", now);
        assert_eq!(cookie.domain, "example.com");
    }

    #[test]
    fn default_path_follows_rfc6265() {
        assert_eq!(default_path("/section/page"), "/section");
        assert_eq!(default_path("/section/"), "/section");
        assert_eq!(default_path("/page"), "/");
        assert_eq!(default_path("/"), "/");
        assert_eq!(default_path(""), "/");
        assert_eq!(default_path("relative"), "/");
    }

    #[test]
    fn max_age_takes_precedence_over_expires() {
        let now = Utc::now();
        let cookie =
            parse_set_cookie("a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=3600")
                .expect("cookie")
                .resolve("example.com", "/", now);
        assert_eq!(cookie.expires, Some(now + Duration::seconds(3600)));
    }

    #[test]
    fn parses_rfc1123_expires() {
        let cookie = parse_set_cookie("a=1; expires=Wed, 21 Oct 2015 07:28:00 GMT")
            .expect("cookie");
        let expires = cookie.expires.expect("expires");
        assert_eq!(expires.to_rfc3339(), "2015-10-21T07:28:00+00:00");
    }

    #[test]
    fn parses_legacy_dashed_expires() {
        let cookie = parse_set_cookie("a=1; expires=Wed, 21-Oct-2015 07:28:00 GMT")
            .expect("cookie");
        assert!(cookie.expires.is_some());
    }

    #[test]
    fn unparseable_expires_degrades_to_session() {
        let cookie = parse_set_cookie("a=1; expires=whenever").expect("cookie");
        assert_eq!(cookie.expires, None);
    }
}
