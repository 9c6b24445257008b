//! High-level driver surface over the raw transport: one attached page
//! target, its frame registry, and the typed event stream the collector
//! consumes.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ProbeError, ProbeErrorKind};
use crate::events::ProbeEvent;
use crate::registry::FrameRegistry;
use crate::transport::{CommandTarget, Transport, TransportEvent};
use crate::ProbeConfig;

pub struct PageProbe {
    transport: Arc<Transport>,
    session: String,
    registry: Arc<FrameRegistry>,
    load_tx: broadcast::Sender<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PageProbe {
    /// Launches the browser, attaches to a fresh page target and starts
    /// the event pump. The receiver carries every decoded page event.
    pub async fn start(
        config: &ProbeConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ProbeEvent>), ProbeError> {
        let (transport, raw_rx) = Transport::start(config).await?;
        let transport = Arc::new(transport);

        let created = transport
            .send(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = str_at(&created, "/targetId").ok_or_else(|| {
            ProbeError::new(ProbeErrorKind::Internal).with_hint("createTarget without targetId")
        })?;

        let attached = transport
            .send(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session = str_at(&attached, "/sessionId").ok_or_else(|| {
            ProbeError::new(ProbeErrorKind::Internal).with_hint("attachToTarget without sessionId")
        })?;

        let registry = Arc::new(FrameRegistry::new());
        let (load_tx, _) = broadcast::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pump = spawn_pump(
            raw_rx,
            session.clone(),
            Arc::clone(&registry),
            load_tx.clone(),
            events_tx,
        );

        let probe = Arc::new(Self {
            transport,
            session,
            registry,
            load_tx,
            pump: Mutex::new(Some(pump)),
        });

        for method in ["Page.enable", "Runtime.enable", "Network.enable", "DOMStorage.enable"] {
            probe.command(method, Value::Object(Default::default())).await?;
        }
        probe
            .command(
                "Network.setUserAgentOverride",
                json!({
                    "userAgent": config.user_agent,
                    "acceptLanguage": config.accept_language,
                }),
            )
            .await?;

        info!(target: "cdp-probe", "page target attached");
        Ok((probe, events_rx))
    }

    async fn command(&self, method: &str, params: Value) -> Result<Value, ProbeError> {
        self.transport
            .send(CommandTarget::Session(self.session.clone()), method, params)
            .await
    }

    pub fn registry(&self) -> Arc<FrameRegistry> {
        Arc::clone(&self.registry)
    }

    /// Exposes a host binding callable as `window.<name>(payload)` in
    /// every context of the page.
    pub async fn expose_binding(&self, name: &str) -> Result<(), ProbeError> {
        self.command("Runtime.addBinding", json!({ "name": name }))
            .await
            .map(|_| ())
    }

    /// Installs source text evaluated before any page script on every new
    /// document.
    pub async fn add_init_script(&self, source: &str) -> Result<(), ProbeError> {
        self.command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await
        .map(|_| ())
    }

    /// Navigates and waits for the document load event. `timeout_ms = 0`
    /// waits unbounded; an elapsed timeout or a navigation error is
    /// reported as the corresponding fatal kind.
    pub async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<(), ProbeError> {
        let mut load_rx = self.load_tx.subscribe();

        let result = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = str_at(&result, "/errorText").filter(|t| !t.is_empty()) {
            return Err(ProbeError::new(ProbeErrorKind::NavFailed).with_hint(error_text));
        }

        let wait = async {
            loop {
                match load_rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => break Ok(()),
                    Err(broadcast::error::RecvError::Closed) => {
                        break Err(ProbeError::new(ProbeErrorKind::CdpIo)
                            .with_hint("event pump stopped during navigation"))
                    }
                }
            }
        };

        if timeout_ms == 0 {
            wait.await
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), wait).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::new(ProbeErrorKind::NavTimeout)
                    .with_hint(format!("no load event within {timeout_ms}ms for {url}"))),
            }
        }
    }

    /// Evaluates an expression in the page, returning its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, ProbeError> {
        let result = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(exception) = result.pointer("/exceptionDetails") {
            return Err(ProbeError::new(ProbeErrorKind::Internal)
                .with_hint(format!("evaluate threw: {exception}")));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Full cookie jar of the browser, as raw CDP cookie objects.
    pub async fn get_all_cookies(&self) -> Result<Vec<Value>, ProbeError> {
        let result = self
            .command("Network.getAllCookies", Value::Object(Default::default()))
            .await?;
        Ok(result
            .pointer("/cookies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Local-storage entries for one security origin.
    pub async fn get_dom_storage_items(
        &self,
        origin: &str,
    ) -> Result<Vec<(String, String)>, ProbeError> {
        let result = self
            .command(
                "DOMStorage.getDOMStorageItems",
                json!({
                    "storageId": { "isLocalStorage": true, "securityOrigin": origin }
                }),
            )
            .await?;
        let entries = result
            .pointer("/entries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let pair = entry.as_array()?;
                Some((
                    pair.first()?.as_str()?.to_string(),
                    pair.get(1)?.as_str()?.to_string(),
                ))
            })
            .collect())
    }

    /// Installs one preset cookie before browsing starts.
    pub async fn set_cookie(&self, params: Value) -> Result<(), ProbeError> {
        self.command("Network.setCookie", params).await.map(|_| ())
    }

    pub async fn set_extra_http_headers(&self, headers: Value) -> Result<(), ProbeError> {
        self.command("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
            .await
            .map(|_| ())
    }

    /// PNG screenshot of the viewport, or of the whole page when
    /// `full_page` is set.
    pub async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, ProbeError> {
        let result = self
            .command(
                "Page.captureScreenshot",
                json!({ "captureBeyondViewport": full_page }),
            )
            .await?;
        let data = str_at(&result, "/data").ok_or_else(|| {
            ProbeError::new(ProbeErrorKind::Internal).with_hint("screenshot without data")
        })?;
        BASE64.decode(data).map_err(|err| {
            ProbeError::new(ProbeErrorKind::Internal)
                .with_hint(format!("screenshot decode failed: {err}"))
        })
    }

    pub async fn scroll_to_bottom(&self) -> Result<(), ProbeError> {
        self.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map(|_| ())
    }

    /// Browser product string and user agent.
    pub async fn browser_version(&self) -> Result<(String, String), ProbeError> {
        let result = self
            .transport
            .send(
                CommandTarget::Browser,
                "Browser.getVersion",
                Value::Object(Default::default()),
            )
            .await?;
        Ok((
            str_at(&result, "/product").unwrap_or_default(),
            str_at(&result, "/userAgent").unwrap_or_default(),
        ))
    }

    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().ok().and_then(|mut guard| guard.take()) {
            pump.abort();
        }
        self.transport.shutdown().await;
        debug!(target: "cdp-probe", "probe shut down");
    }
}

fn spawn_pump(
    mut raw_rx: mpsc::Receiver<TransportEvent>,
    session: String,
    registry: Arc<FrameRegistry>,
    load_tx: broadcast::Sender<()>,
    events_tx: mpsc::UnboundedSender<ProbeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(raw) = raw_rx.recv().await {
            // Events of other sessions (there are none in a normal run,
            // but autodiscovered targets can surface) are not ours.
            if raw
                .session_id
                .as_deref()
                .is_some_and(|id| id != session)
            {
                continue;
            }

            match raw.method.as_str() {
                "Page.frameAttached" => {
                    if let Some(frame_id) = raw.params.pointer("/frameId").and_then(Value::as_str) {
                        let parent = raw
                            .params
                            .pointer("/parentFrameId")
                            .and_then(Value::as_str);
                        registry.on_attached(frame_id, parent);
                    }
                }
                "Page.frameNavigated" => {
                    if let (Some(frame_id), Some(url)) = (
                        raw.params.pointer("/frame/id").and_then(Value::as_str),
                        raw.params.pointer("/frame/url").and_then(Value::as_str),
                    ) {
                        let parent = raw
                            .params
                            .pointer("/frame/parentId")
                            .and_then(Value::as_str);
                        registry.on_navigated(frame_id, url, parent);
                    }
                }
                "Page.frameDetached" => {
                    if let Some(frame_id) = raw.params.pointer("/frameId").and_then(Value::as_str) {
                        registry.on_detached(frame_id);
                    }
                }
                _ => {}
            }

            if let Some(event) = ProbeEvent::from_transport(&raw) {
                if matches!(event, ProbeEvent::Load) {
                    let _ = load_tx.send(());
                }
                if events_tx.send(event).is_err() {
                    break;
                }
            }
        }
    })
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}
