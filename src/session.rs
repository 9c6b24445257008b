//! One browsing session end to end: launch and instrument the browser,
//! drive the primary navigation and the sampled sub-page visits, collect
//! the live state, then run the correlation pass and assemble the
//! inspection record.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use cdp_probe::{FrameRegistry, PageProbe, ProbeConfig, ProbeError, ProbeEvent};
use evidence_inspector::Inspector;
use evidence_log::{LogLevel, LogStore};
use net_observe::{
    FrameResolver, HostsTable, NetworkObserver, ObservedRequest, ObservedResponse, RuleList,
    TrackerMatcher, WsRecorder,
};
use page_instrument::{Bridge, BINDING_NAME, INSTRUMENT_SOURCE};
use party_classifier::RefPattern;

use crate::cli::Cli;
use crate::collect;
use crate::connection;
use crate::output::Inspection;

const DEFAULT_TRACKER_RULES: &str = include_str!("../assets/default-tracker-rules.txt");
const DNT_JS: &str = "Object.defineProperty(navigator, 'doNotTrack', { value: '1' });";

#[derive(Debug, Error)]
pub enum RunError {
    /// Navigation to the primary target failed or timed out. Partial
    /// browsing could understate tracking and mislead an audit, so the
    /// session aborts with a distinct exit code instead of collecting
    /// partial evidence.
    #[error("fatal navigation error: {0}")]
    Fatal(ProbeError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Bridges the probe's frame registry into the observer's resolver seam.
struct RegistryFrames(Arc<FrameRegistry>);

impl FrameResolver for RegistryFrames {
    fn frame_url(&self, frame_id: &str) -> Option<String> {
        self.0.frame_url(frame_id)
    }
    fn top_frame_url(&self, frame_id: &str) -> Option<String> {
        self.0.top_frame_url(frame_id)
    }
}

pub async fn run(cli: &Cli) -> Result<Inspection, RunError> {
    let uri_ins =
        Url::parse(&cli.url).with_context(|| format!("invalid inspection uri {}", cli.url))?;
    let mut uri_refs = vec![cli.url.clone()];
    uri_refs.extend(cli.first_party_uri.iter().cloned());
    let ref_urls: Vec<Url> = uri_refs
        .iter()
        .map(|uri| Url::parse(uri).with_context(|| format!("invalid first-party uri {uri}")))
        .collect::<Result<_, _>>()?;
    let pattern =
        Arc::new(RefPattern::new(&ref_urls).context("building the reference set pattern")?);

    // The CLI entry point prepares (and possibly empties) the output
    // directory before logging attaches to it; here it only needs to
    // exist.
    let output_dir = cli.output_dir().cloned();
    if let Some(dir) = &output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output folder {}", dir.display()))?;
    }

    let log = Arc::new(match &output_dir {
        Some(dir) => LogStore::with_file(&dir.join("inspection-log.ndjson"))
            .context("opening the evidence log sink")?,
        None => LogStore::in_memory(),
    });

    let mut inspection = Inspection::new(
        &cli.url,
        uri_refs,
        cli.title.clone(),
        cli.task_description.clone(),
    );

    let matchers = load_tracker_lists(&cli.tracker_list)?;
    let primary_list = matchers.first().map(|m| m.list_name().to_string());

    let probe_config = ProbeConfig {
        headless: cli.headless,
        user_data_dir: cli
            .browser_profile
            .clone()
            .or_else(|| output_dir.as_ref().map(|dir| dir.join("browser-profile"))),
        accept_language: cli.lang.clone(),
        browser_args: cli.browser_options.clone(),
        ..ProbeConfig::default()
    };
    let (probe, events) = PageProbe::start(&probe_config)
        .await
        .map_err(|err| RunError::Other(anyhow::anyhow!("browser start failed: {err}")))?;

    let hosts = Arc::new(HostsTable::new());
    let observer = Arc::new(NetworkObserver::new(
        Arc::clone(&pattern),
        Arc::clone(&hosts),
        Arc::clone(&log),
        Arc::new(RegistryFrames(probe.registry())),
        matchers,
    ));
    let bridge = Arc::new(Bridge::new(Arc::clone(&log)));
    let ws = Arc::new(WsRecorder::new(Arc::clone(&log)));
    let redirects: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let primary_nav = Arc::new(AtomicBool::new(true));

    let dispatcher = spawn_dispatcher(
        events,
        Arc::clone(&bridge),
        Arc::clone(&observer),
        Arc::clone(&ws),
        Arc::clone(&log),
        Arc::clone(&redirects),
        Arc::clone(&primary_nav),
    );

    let result = drive_session(
        cli,
        &uri_ins,
        &probe,
        &log,
        &pattern,
        &hosts,
        &redirects,
        &primary_nav,
        output_dir.as_deref(),
        &mut inspection,
    )
    .await;

    inspection.websockets = ws.snapshot();
    probe.shutdown().await;
    dispatcher.abort();
    inspection.end_time = Some(Utc::now());

    // Propagate a browsing failure only after the browser is down.
    result?;

    let inspector = Inspector::from_store(&log, pattern, hosts, primary_list)
        .context("reading the evidence log back")?;
    let live_cookies = std::mem::take(&mut inspection.cookies);
    inspection.cookies = inspector.inspect_cookies(&live_cookies);
    inspector.inspect_local_storage(&mut inspection.local_storage);
    inspection.beacons = inspector.inspect_beacons();
    inspection.hosts = inspector.hosts_report();

    log.flush().context("flushing the evidence log")?;
    if let Some(dir) = &output_dir {
        inspection.write_artifacts(dir)?;
    }

    Ok(inspection)
}

/// The live browsing phase. Split out so teardown and correlation happen
/// exactly once regardless of where browsing fails.
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    cli: &Cli,
    uri_ins: &Url,
    probe: &Arc<PageProbe>,
    log: &Arc<LogStore>,
    pattern: &Arc<RefPattern>,
    hosts: &Arc<HostsTable>,
    redirects: &Arc<Mutex<Vec<String>>>,
    primary_nav: &Arc<AtomicBool>,
    output_dir: Option<&std::path::Path>,
    inspection: &mut Inspection,
) -> Result<(), RunError> {
    probe
        .expose_binding(BINDING_NAME)
        .await
        .map_err(into_other)?;
    probe
        .add_init_script(INSTRUMENT_SOURCE)
        .await
        .map_err(into_other)?;

    if cli.wants_dnt_header() {
        inspection
            .browser
            .extra_headers
            .insert("dnt".to_string(), "1".to_string());
        probe
            .set_extra_http_headers(json!({ "dnt": "1" }))
            .await
            .map_err(into_other)?;
        if cli.dnt_js {
            probe.add_init_script(DNT_JS).await.map_err(into_other)?;
        }
    }

    if let Some(raw) = &cli.set_cookie {
        for cookie in collect::parse_preset_cookies(raw, uri_ins, log) {
            log.notice(
                LogLevel::Info,
                "Browser",
                format!(
                    "presetting cookie {}={} for request {}",
                    cookie.name, cookie.value, cookie.url
                ),
            );
            probe
                .set_cookie(json!({
                    "name": cookie.name,
                    "value": cookie.value,
                    "url": cookie.url,
                    "expires": cookie.expires,
                }))
                .await
                .map_err(into_other)?;
            inspection
                .browser
                .preset_cookies
                .insert(cookie.name, cookie.value);
        }
    }

    if let Ok((product, user_agent)) = probe.browser_version().await {
        inspection.browser.version = product;
        inspection.browser.user_agent = user_agent;
    }

    // Primary navigation: any failure here is fatal to the session.
    log.notice(
        LogLevel::Info,
        "Browser",
        format!("browsing now to {uri_ins}"),
    );
    if let Err(err) = probe.navigate(uri_ins.as_str(), cli.page_timeout).await {
        log.notice(LogLevel::Error, "Browser", err.to_string());
        return Err(RunError::Fatal(err));
    }
    primary_nav.store(false, Ordering::Relaxed);
    inspection.uri_redirects = redirects.lock().clone();
    inspection.uri_dest = probe
        .evaluate("window.location.href")
        .await
        .ok()
        .and_then(|value| value.as_str().map(str::to_string));

    tokio::time::sleep(Duration::from_millis(cli.sleep)).await;

    inspection.secure_connection = connection::check_secure_connection(uri_ins).await;

    collect::collect_local_storage(probe, log, &mut inspection.local_storage).await;

    let links = collect::collect_links(probe).await.map_err(RunError::Other)?;
    let (first_party, third_party) = collect::map_links_to_parties(&links, hosts, pattern);
    inspection.links.social = collect::filter_social_platforms(&links);
    inspection.links.keywords = collect::filter_keywords(&links);
    inspection.links.first_party = first_party;
    inspection.links.third_party = third_party;

    inspection.unsafe_forms = collect::collect_unsafe_forms(probe)
        .await
        .map_err(RunError::Other)?;

    if cli.screenshots {
        if let Some(dir) = output_dir {
            record_screenshots(probe, dir, log).await;
        }
    }

    browse_samples(cli, probe, log, inspection).await;

    inspection.cookies = collect::collect_cookies(probe, inspection.start_time)
        .await
        .map_err(RunError::Other)?;

    Ok(())
}

/// Visits `--browse-link` URIs plus a random sample of first-party links.
/// Per-link failures and non-HTML targets are skipped, never fatal.
async fn browse_samples(
    cli: &Cli,
    probe: &Arc<PageProbe>,
    log: &Arc<LogStore>,
    inspection: &mut Inspection,
) {
    let user_set: Vec<String> = cli.browse_link.clone();
    let sample_count = cli.max.saturating_sub(user_set.len());
    let sampled: Vec<String> = {
        let mut rng = rand::thread_rng();
        inspection
            .links
            .first_party
            .choose_multiple(&mut rng, sample_count)
            .map(|link| link.href.clone())
            .collect()
    };

    let root = inspection
        .uri_dest
        .clone()
        .unwrap_or_else(|| inspection.uri_ins.clone());
    inspection.browsing_history = std::iter::once(root)
        .chain(user_set)
        .chain(sampled)
        .collect();

    let visits: Vec<String> = inspection.browsing_history[1..].to_vec();
    for link in &visits {
        if let Some(content_type) = connection::head_content_type(link).await {
            if !content_type.starts_with("text/html") {
                log.notice(
                    LogLevel::Info,
                    "Browser",
                    format!("skipping now {link} of mime-type {content_type}"),
                );
                continue;
            }
        }

        log.notice(LogLevel::Info, "Browser", format!("browsing now to {link}"));
        if let Err(err) = probe.navigate(link, cli.page_timeout).await {
            log.notice(LogLevel::Warn, "Browser", err.to_string());
            continue;
        }

        tokio::time::sleep(Duration::from_millis(cli.sleep)).await;
        collect::collect_local_storage(probe, log, &mut inspection.local_storage).await;
    }
}

async fn record_screenshots(probe: &Arc<PageProbe>, dir: &std::path::Path, log: &Arc<LogStore>) {
    let result: Result<(), ProbeError> = async {
        let top = probe.screenshot(false).await?;
        std::fs::write(dir.join("screenshot-top.png"), top)
            .map_err(|err| probe_io_error(&err.to_string()))?;
        probe.scroll_to_bottom().await?;
        let bottom = probe.screenshot(false).await?;
        std::fs::write(dir.join("screenshot-bottom.png"), bottom)
            .map_err(|err| probe_io_error(&err.to_string()))?;
        let full = probe.screenshot(true).await?;
        std::fs::write(dir.join("screenshot-full.png"), full)
            .map_err(|err| probe_io_error(&err.to_string()))?;
        Ok(())
    }
    .await;

    if result.is_err() {
        log.notice(
            LogLevel::Info,
            "Browser",
            "not saving some screenshots due to software limitations",
        );
    }
}

fn probe_io_error(hint: &str) -> ProbeError {
    ProbeError::new(cdp_probe::ProbeErrorKind::Internal).with_hint(hint)
}

fn into_other(err: ProbeError) -> RunError {
    RunError::Other(anyhow::anyhow!(err.to_string()))
}

/// Loads the configured tracker lists; the bundled fallback rules are
/// used when none are given. The first list is the primary one.
fn load_tracker_lists(paths: &[PathBuf]) -> Result<Vec<Arc<dyn TrackerMatcher>>, RunError> {
    if paths.is_empty() {
        return Ok(vec![Arc::new(RuleList::parse(
            "default-tracker-rules.txt",
            DEFAULT_TRACKER_RULES,
        ))]);
    }
    let mut matchers: Vec<Arc<dyn TrackerMatcher>> = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read tracker list {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let list = RuleList::parse(name.clone(), &text);
        info!(target: "collector", list = %name, rules = list.len(), "tracker list loaded");
        matchers.push(Arc::new(list));
    }
    Ok(matchers)
}

fn spawn_dispatcher(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ProbeEvent>,
    bridge: Arc<Bridge>,
    observer: Arc<NetworkObserver>,
    ws: Arc<WsRecorder>,
    log: Arc<LogStore>,
    redirects: Arc<Mutex<Vec<String>>>,
    primary_nav: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ProbeEvent::BindingCalled { name, payload } if name == BINDING_NAME => {
                    if let Err(err) = bridge.report_event(&payload) {
                        warn!(target: "collector", %err, "dropped malformed page report");
                    }
                }
                ProbeEvent::BindingCalled { .. } => {}
                ProbeEvent::Request {
                    request_id,
                    url,
                    frame_id,
                    resource_type,
                    redirect_from,
                    is_document,
                } => {
                    if is_document && primary_nav.load(Ordering::Relaxed) {
                        if let Some(previous) = &redirect_from {
                            redirects.lock().push(previous.clone());
                        }
                    }
                    observer.on_request(&ObservedRequest {
                        request_id,
                        url,
                        frame_id,
                        resource_type,
                    });
                }
                ProbeEvent::ResponseHeaders {
                    request_id,
                    set_cookie,
                } => {
                    if set_cookie.is_some() {
                        observer.on_response(&ObservedResponse {
                            request_id,
                            url: None,
                            set_cookie,
                        });
                    }
                }
                ProbeEvent::WebSocketCreated { request_id, url } => {
                    ws.on_created(&request_id, &url);
                }
                ProbeEvent::WebSocketFrame {
                    request_id,
                    timestamp,
                    outgoing,
                    payload,
                } => {
                    if outgoing {
                        ws.on_frame_sent(&request_id, timestamp, &payload);
                    } else {
                        ws.on_frame_received(&request_id, timestamp, &payload);
                    }
                }
                ProbeEvent::Console { text } => {
                    log.notice(LogLevel::Debug, "Browser.Console", text);
                }
                ProbeEvent::FrameNavigated { .. } | ProbeEvent::Load => {}
            }
        }
    })
}
