//! The final inspection record and its serialization. Key names follow the
//! established evidence format so downstream report tooling keeps working.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use evidence_inspector::{Beacon, Cookie, LocalStorageMap};
use net_observe::{HostsReport, WsConnection};

use crate::connection::SecureConnection;

#[derive(Clone, Debug, Default, Serialize)]
pub struct Link {
    pub href: String,
    pub inner_text: String,
    pub inner_html: String,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksReport {
    pub first_party: Vec<Link>,
    pub third_party: Vec<Link>,
    pub social: Vec<Link>,
    pub keywords: Vec<Link>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct UnsafeForm {
    pub id: String,
    pub action: String,
    pub method: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScriptInfo {
    pub host: String,
    pub version: String,
    pub cmd_args: String,
    /// WEC_*/CHROM* environment relevant to reproducing the run.
    pub environment: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PlatformInfo {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
    pub user_agent: String,
    pub platform: PlatformInfo,
    pub extra_headers: BTreeMap<String, String>,
    pub preset_cookies: BTreeMap<String, String>,
}

/// The inspection record handed to report writers.
#[derive(Clone, Debug, Serialize)]
pub struct Inspection {
    pub title: String,
    pub task_description: Value,
    pub uri_ins: String,
    pub uri_refs: Vec<String>,
    pub uri_dest: Option<String>,
    pub uri_redirects: Vec<String>,
    pub secure_connection: SecureConnection,
    pub host: String,
    pub script: ScriptInfo,
    pub browser: BrowserInfo,
    pub browsing_history: Vec<String>,
    pub links: LinksReport,
    #[serde(rename = "unsafeForms")]
    pub unsafe_forms: Vec<UnsafeForm>,
    pub cookies: Vec<Cookie>,
    #[serde(rename = "localStorage")]
    pub local_storage: LocalStorageMap,
    pub beacons: Vec<Beacon>,
    pub hosts: HostsReport,
    pub websockets: BTreeMap<String, WsConnection>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Inspection {
    pub fn new(uri_ins: &str, uri_refs: Vec<String>, title: Option<String>, task_description: Option<String>) -> Self {
        let host = url::Url::parse(uri_ins)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            title: title.unwrap_or_else(|| "Website Evidence Collection".to_string()),
            task_description: task_description
                .as_deref()
                .map(evidence_log::safe_parse)
                .unwrap_or(Value::Null),
            uri_ins: uri_ins.to_string(),
            uri_refs,
            uri_dest: None,
            uri_redirects: Vec::new(),
            secure_connection: SecureConnection::default(),
            host,
            script: ScriptInfo {
                host: std::env::var("HOSTNAME").unwrap_or_default(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                cmd_args: std::env::args().skip(1).collect::<Vec<_>>().join(" "),
                environment: std::env::vars()
                    .filter(|(key, _)| key.starts_with("WEC") || key.starts_with("CHROM"))
                    .collect(),
            },
            browser: BrowserInfo {
                name: "Chromium".to_string(),
                platform: PlatformInfo {
                    name: std::env::consts::OS.to_string(),
                    version: std::env::consts::ARCH.to_string(),
                },
                ..BrowserInfo::default()
            },
            browsing_history: Vec::new(),
            links: LinksReport::default(),
            unsafe_forms: Vec::new(),
            cookies: Vec::new(),
            local_storage: LocalStorageMap::new(),
            beacons: Vec::new(),
            hosts: HostsReport::default(),
            websockets: BTreeMap::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Writes the full artifact set into the output directory.
    pub fn write_artifacts(&self, dir: &Path) -> Result<()> {
        write_json(dir.join("inspection.json"), self)?;
        write_yaml(dir.join("inspection.yml"), self)?;
        write_yaml(dir.join("cookies.yml"), &self.cookies)?;
        write_yaml(dir.join("local-storage.yml"), &self.local_storage)?;
        write_yaml(dir.join("beacons.yml"), &self.beacons)?;
        write_json(dir.join("websockets-log.json"), &self.websockets)?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing inspection to JSON")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serializing inspection to YAML")
    }
}

fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let dump = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    fs::write(path, dump).with_context(|| format!("writing {}", path.display()))
}

fn write_yaml<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let dump =
        serde_yaml::to_string(value).with_context(|| format!("serializing {}", path.display()))?;
    fs::write(path, dump).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_keys_follow_the_evidence_format() {
        let inspection = Inspection::new(
            "https://example.com/",
            vec!["https://example.com/".to_string()],
            None,
            Some("{\"audit\":42}".to_string()),
        );
        let json: Value = serde_json::from_str(&inspection.to_json_string().expect("json"))
            .expect("round trip");
        assert_eq!(json["uri_ins"], "https://example.com/");
        assert_eq!(json["host"], "example.com");
        assert_eq!(json["task_description"]["audit"], 42);
        assert!(json.get("unsafeForms").is_some());
        assert!(json.get("localStorage").is_some());
        assert!(json["hosts"].get("requests").is_some());
    }

    #[test]
    fn artifacts_land_in_the_output_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inspection = Inspection::new("https://example.com/", vec![], None, None);
        inspection.write_artifacts(dir.path()).expect("write");
        for name in [
            "inspection.json",
            "inspection.yml",
            "cookies.yml",
            "local-storage.yml",
            "beacons.yml",
            "websockets-log.json",
        ] {
            assert!(dir.path().join(name).is_file(), "{name} missing");
        }
    }
}
