//! Page collectors: links, webforms, the live cookie jar and the DOM
//! storage snapshot, plus preset-cookie parsing. All of them run against
//! the probe's page surface; per-item failures degrade to warnings.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{escape, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use cdp_probe::PageProbe;
use evidence_inspector::{Cookie, LocalStorageMap, StorageEntry};
use evidence_log::{safe_parse, LogLevel, LogStore};
use net_observe::{HostCategory, HostsTable, Party};
use party_classifier::RefPattern;

use crate::output::{Link, UnsafeForm};

const SOCIAL_PLATFORMS_YAML: &str = include_str!("../assets/social-media-platforms.yml");
const KEYWORDS_YAML: &str = include_str!("../assets/keywords.yml");

const COLLECT_LINKS_JS: &str = r#"
(() => {
  return Array.from(document.querySelectorAll('a[href]'))
    .map((a) => ({
      href: String(a.href).split('#')[0],
      inner_text: a.innerText,
      inner_html: a.innerHTML.trim(),
    }))
    .filter((link) => link.href.startsWith('http'));
})()
"#;

const COLLECT_FORMS_JS: &str = r#"
(() => {
  return Array.from(document.querySelectorAll('form'))
    .map((form) => {
      let action = '';
      try {
        action = new URL(form.getAttribute('action') || '', form.baseURI).toString();
      } catch (err) {
        action = String(form.getAttribute('action') || '');
      }
      return { id: form.id, action: action, method: form.method };
    })
    .filter((form) => form.action.startsWith('http:'));
})()
"#;

/// All links of the current page, fragment-stripped and deduplicated.
pub async fn collect_links(probe: &PageProbe) -> Result<Vec<Link>> {
    #[derive(Deserialize)]
    struct RawLink {
        href: String,
        #[serde(default)]
        inner_text: String,
        #[serde(default)]
        inner_html: String,
    }

    let value = probe
        .evaluate(COLLECT_LINKS_JS)
        .await
        .context("link collection failed")?;
    let raw: Vec<RawLink> = serde_json::from_value(value).unwrap_or_default();

    let mut links: Vec<Link> = Vec::new();
    for link in raw {
        // URLs differing only by fragment count once.
        if links.iter().any(|existing| existing.href == link.href) {
            continue;
        }
        links.push(Link {
            href: link.href,
            inner_text: link.inner_text,
            inner_html: link.inner_html,
        });
    }
    Ok(links)
}

/// Splits links by party and records their hosts in the links category.
pub fn map_links_to_parties(
    links: &[Link],
    hosts: &HostsTable,
    pattern: &RefPattern,
) -> (Vec<Link>, Vec<Link>) {
    let mut first_party = Vec::new();
    let mut third_party = Vec::new();
    for link in links {
        let Ok(url) = Url::parse(&link.href) else {
            continue;
        };
        let Some(host) = url.host_str().map(str::to_string) else {
            continue;
        };
        if pattern.is_first_party(&url) {
            hosts.add(HostCategory::Links, Party::First, &host);
            first_party.push(link.clone());
        } else {
            hosts.add(HostCategory::Links, Party::Third, &host);
            third_party.push(link.clone());
        }
    }
    (first_party, third_party)
}

static SOCIAL_PLATFORMS: Lazy<regex::Regex> = Lazy::new(|| {
    let platforms: Vec<String> = serde_yaml::from_str(SOCIAL_PLATFORMS_YAML).unwrap_or_default();
    let escaped: Vec<String> = platforms.iter().map(|p| escape(p)).collect();
    RegexBuilder::new(&format!("\\b({})\\b", escaped.join("|")))
        .case_insensitive(true)
        .build()
        .expect("embedded social platform pattern")
});

static KEYWORDS: Lazy<regex::Regex> = Lazy::new(|| {
    let keywords: Vec<String> = serde_yaml::from_str(KEYWORDS_YAML).unwrap_or_default();
    let escaped: Vec<String> = keywords.iter().map(|k| escape(k)).collect();
    RegexBuilder::new(&escaped.join("|"))
        .case_insensitive(true)
        .build()
        .expect("embedded keyword pattern")
});

pub fn filter_social_platforms(links: &[Link]) -> Vec<Link> {
    links
        .iter()
        .filter(|link| SOCIAL_PLATFORMS.is_match(&link.href))
        .cloned()
        .collect()
}

/// Links whose target or caption mentions a keyword of interest.
pub fn filter_keywords(links: &[Link]) -> Vec<Link> {
    links
        .iter()
        .filter(|link| KEYWORDS.is_match(&link.href) || KEYWORDS.is_match(&link.inner_html))
        .cloned()
        .collect()
}

/// Forms submitting over plain http.
pub async fn collect_unsafe_forms(probe: &PageProbe) -> Result<Vec<UnsafeForm>> {
    #[derive(Deserialize)]
    struct RawForm {
        #[serde(default)]
        id: String,
        action: String,
        #[serde(default)]
        method: String,
    }

    let value = probe
        .evaluate(COLLECT_FORMS_JS)
        .await
        .context("form collection failed")?;
    let raw: Vec<RawForm> = serde_json::from_value(value).unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|form| UnsafeForm {
            id: form.id,
            action: form.action,
            method: form.method,
        })
        .collect())
}

/// The live cookie jar at session end.
pub async fn collect_cookies(probe: &PageProbe, start_time: DateTime<Utc>) -> Result<Vec<Cookie>> {
    let raw = probe.get_all_cookies().await.context("cookie jar read failed")?;
    let mut cookies = Vec::new();
    for value in raw {
        let name = value.pointer("/name").and_then(Value::as_str).unwrap_or_default();
        // Chromium retains cookies with empty name and value when servers
        // send an empty Set-Cookie header; those are artifacts, not state.
        if name.is_empty() {
            continue;
        }
        let mut cookie = Cookie::live(
            name,
            value.pointer("/domain").and_then(Value::as_str).unwrap_or_default(),
            value
                .pointer("/path")
                .and_then(Value::as_str)
                .unwrap_or("/")
                .to_string(),
            value
                .pointer("/value")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            value.pointer("/expires").and_then(Value::as_f64).unwrap_or(-1.0),
            start_time,
        );
        cookie.secure = value.pointer("/secure").and_then(Value::as_bool);
        cookie.http_only = value.pointer("/httpOnly").and_then(Value::as_bool);
        cookie.same_site = value
            .pointer("/sameSite")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(session) = value.pointer("/session").and_then(Value::as_bool) {
            cookie.session = session;
        }
        cookies.push(cookie);
    }
    Ok(cookies)
}

/// Reads DOM storage for every visited http(s) frame origin and merges it
/// into `data`; later snapshots extend earlier ones. Per-origin read
/// errors degrade to a warning notice in the evidence log.
pub async fn collect_local_storage(
    probe: &PageProbe,
    log: &Arc<LogStore>,
    data: &mut LocalStorageMap,
) {
    let mut origins: Vec<String> = probe
        .registry()
        .frame_urls()
        .iter()
        .filter(|url| url.starts_with("http"))
        .filter_map(|url| Url::parse(url).ok())
        .map(|url| url.origin().ascii_serialization())
        .collect();
    origins.sort();
    origins.dedup();

    for origin in origins {
        match probe.get_dom_storage_items(&origin).await {
            Ok(entries) => {
                if entries.is_empty() {
                    continue;
                }
                let slot: &mut BTreeMap<String, StorageEntry> =
                    data.entry(origin.clone()).or_default();
                for (key, value) in entries {
                    slot.insert(
                        key,
                        StorageEntry {
                            value: safe_parse(&value),
                            first_party_storage: None,
                            log: None,
                        },
                    );
                }
            }
            Err(err) => {
                // Some origins expose no storage to DOMStorage; skip them
                // but keep the anomaly in the evidence log.
                log.notice(LogLevel::Warn, "Browser", err.to_string());
            }
        }
    }
}

/// A cookie installed into the browser before browsing starts.
#[derive(Clone, Debug, PartialEq)]
pub struct PresetCookie {
    pub name: String,
    pub value: String,
    pub url: String,
    pub expires: f64,
}

/// Default lifetime for preset cookies handed over without expiry.
const PRESET_COOKIE_LIFETIME_SECS: i64 = 60 * 60 * 24 * 365;

/// Parses `--set-cookie`: either a Netscape-format cookie file or inline
/// `name=value;...` pairs.
pub fn parse_preset_cookies(raw: &str, uri_ins: &Url, log: &LogStore) -> Vec<PresetCookie> {
    let default_expires = (Utc::now().timestamp() + PRESET_COOKIE_LIFETIME_SECS) as f64;

    if Path::new(raw).exists() {
        info!(target: "collector", file = raw, "reading preset cookies from file");
        let Ok(content) = std::fs::read_to_string(raw) else {
            warn!(target: "collector", file = raw, "cannot read cookie file");
            return Vec::new();
        };
        return parse_netscape_cookies(&content, uri_ins, default_expires, log);
    }

    info!(target: "collector", "parsing --set-cookie as key=value pairs");
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some(PresetCookie {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
                url: uri_ins.to_string(),
                expires: default_expires,
            })
        })
        .collect()
}

// Netscape cookie file format, as used by curl: seven tab-separated
// fields per line (domain, include-subdomains, path, https-only,
// expires, name, value).
fn parse_netscape_cookies(
    content: &str,
    uri_ins: &Url,
    default_expires: f64,
    log: &LogStore,
) -> Vec<PresetCookie> {
    let requested_domain = uri_ins.host_str().unwrap_or_default();
    let protocol = uri_ins.scheme();

    let mut cookies = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            log.notice(
                LogLevel::Error,
                "Browser",
                format!("invalid formatted cookie line - skipping it: {line}"),
            );
            continue;
        }
        let https_only = fields[3].eq_ignore_ascii_case("true");
        if fields[0] != requested_domain || (protocol == "http" && https_only) {
            log.notice(
                LogLevel::Info,
                "Browser",
                format!("{line} does not match the requested domain or is https-only"),
            );
            continue;
        }
        let expires = match fields[4] {
            "0" => default_expires,
            other => other.parse::<f64>().unwrap_or(default_expires),
        };
        cookies.push(PresetCookie {
            name: fields[5].to_string(),
            value: fields[6].to_string(),
            url: format!("{protocol}://{}{}", fields[0], fields[2]),
            expires,
        });
    }
    cookies
}
