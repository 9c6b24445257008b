//! HTTPS posture checks: does the host answer HTTPS at all, and does plain
//! HTTP redirect there. The redirect check tolerates certificate errors;
//! certificate problems are checked in the context of the browsing, not in
//! this reachability probe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::redirect::Policy;
use serde::Serialize;
use tracing::info;
use url::Url;

#[derive(Clone, Debug, Default, Serialize)]
pub struct SecureConnection {
    pub https_redirect: bool,
    pub redirects: Vec<String>,
    pub https_support: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_error: Option<String>,
}

pub async fn check_secure_connection(uri_ins: &Url) -> SecureConnection {
    let mut result = SecureConnection::default();

    // Does the server answer HTTPS?
    let mut https_uri = uri_ins.clone();
    if https_uri.set_scheme("https").is_err() {
        result.https_error = Some("uri scheme cannot be upgraded to https".to_string());
        return result;
    }
    let no_redirect = reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_secs(30))
        .build();
    match no_redirect {
        Ok(client) => match client.get(https_uri.clone()).send().await {
            Ok(_) => result.https_support = true,
            Err(err) => {
                result.https_support = false;
                result.https_error = Some(err.to_string());
            }
        },
        Err(err) => result.https_error = Some(err.to_string()),
    }

    // Does plain HTTP redirect to HTTPS?
    let mut http_uri = uri_ins.clone();
    if http_uri.set_scheme("http").is_err() {
        return result;
    }
    let hops: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&hops);
    let redirecting = reqwest::Client::builder()
        .redirect(Policy::custom(move |attempt| {
            if let Ok(mut guard) = recorded.lock() {
                guard.push(attempt.url().to_string());
            }
            if attempt.previous().len() > 10 {
                attempt.stop()
            } else {
                attempt.follow()
            }
        }))
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(30))
        .build();
    match redirecting {
        Ok(client) => match client.get(http_uri).send().await {
            Ok(_) => {
                let redirects = hops.lock().map(|guard| guard.clone()).unwrap_or_default();
                result.https_redirect = redirects
                    .last()
                    .map(|last| last.starts_with("https"))
                    .unwrap_or(false);
                result.redirects = redirects;
            }
            Err(err) => result.http_error = Some(err.to_string()),
        },
        Err(err) => result.http_error = Some(err.to_string()),
    }

    info!(
        target: "connection",
        https_support = result.https_support,
        https_redirect = result.https_redirect,
        "secure connection checked"
    );
    result
}

/// HEAD probe used before sampled sub-page visits; non-HTML targets are
/// skipped without browsing them.
pub async fn head_content_type(link: &str) -> Option<String> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(30))
        .build()
        .ok()?;
    let response = client.head(link).send().await.ok()?;
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
