//! Raw CDP command/event loop over one DevTools websocket connection.
//! Commands are method strings with JSON params; responses are routed back
//! to their callers by call id, events are fanned out to the probe's pump.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ProbeError, ProbeErrorKind};
use crate::ProbeConfig;

/// One decoded CDP event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Addressing for outgoing commands: the browser target itself or an
/// attached (flattened) session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, ProbeError>>,
}

pub struct Transport {
    command_tx: mpsc::Sender<ControlMessage>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
    deadline: Duration,
}

impl Transport {
    /// Launches Chromium (or connects to `websocket_url`) and starts the
    /// connection loop. The returned receiver carries every CDP event of
    /// the connection.
    pub async fn start(
        cfg: &ProbeConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), ProbeError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = browser_config(cfg)?;
            launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                ProbeError::new(ProbeErrorKind::CdpIo).with_hint(err.to_string())
            })?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-probe", %err, "transport loop terminated with error");
            }
        });

        info!(target: "cdp-probe", url = %ws_url, "chromium connection established");

        Ok((
            Self {
                command_tx,
                loop_task,
                child: Mutex::new(child),
                alive,
                deadline: Duration::from_millis(cfg.default_deadline_ms),
            },
            events_rx,
        ))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Sends one command and awaits its response within the default
    /// deadline.
    pub async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, ProbeError> {
        self.send_with_deadline(target, method, params, self.deadline)
            .await
    }

    pub async fn send_with_deadline(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, ProbeError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx.send(message).await.map_err(|err| {
            ProbeError::new(ProbeErrorKind::CdpIo).with_hint(err.to_string())
        })?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(ProbeError::new(ProbeErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(ProbeError::new(ProbeErrorKind::CdpIo)
                .with_hint(format!("command {method} timed out"))),
        }
    }

    /// Closes the browser and tears the connection down.
    pub async fn shutdown(&self) {
        let _ = self
            .send_with_deadline(
                CommandTarget::Browser,
                "Browser.close",
                Value::Object(Default::default()),
                Duration::from_secs(5),
            )
            .await;
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                debug!(target: "cdp-probe", %err, "chromium child already gone");
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-probe", %err, "failed to kill chromium child");
                        }
                    });
                }
            }
        }
    }
}

fn browser_config(cfg: &ProbeConfig) -> Result<BrowserConfig, ProbeError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(ProbeError::new(ProbeErrorKind::Launch).with_hint(format!(
            "chrome executable not found at {} (set WEC_CHROME)",
            cfg.executable.display()
        )));
    }

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    let mut args = vec![
        "--disable-background-networking".to_string(),
        "--disable-breakpad".to_string(),
        "--disable-client-side-phishing-detection".to_string(),
        "--disable-component-update".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--disable-hang-monitor".to_string(),
        "--disable-popup-blocking".to_string(),
        "--disable-prompt-on-repost".to_string(),
        "--disable-sync".to_string(),
        "--metrics-recording-only".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--password-store=basic".to_string(),
        "--remote-allow-origins=*".to_string(),
        format!("--user-agent={}", cfg.user_agent),
        format!("--lang={}", cfg.accept_language),
        format!("--window-size={},{}", cfg.window_width, cfg.window_height),
    ];
    if cfg.headless {
        args.push("--headless=new".to_string());
        args.push("--hide-scrollbars".to_string());
        args.push("--mute-audio".to_string());
    }
    args.extend(cfg.browser_args.iter().cloned());
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    if let Some(dir) = &cfg.user_data_dir {
        std::fs::create_dir_all(dir).map_err(|err| {
            ProbeError::new(ProbeErrorKind::Launch)
                .with_hint(format!("failed to create user-data-dir: {err}"))
        })?;
        builder = builder.user_data_dir(dir.clone());
    }

    builder.build().map_err(|err| {
        ProbeError::new(ProbeErrorKind::Launch).with_hint(format!("browser config error: {err}"))
    })
}

async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), ProbeError> {
    let mut child = config.launch().map_err(|err| {
        ProbeError::new(ProbeErrorKind::Launch)
            .with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child)
        .await
        .map_err(|err| ProbeError::new(ProbeErrorKind::Launch).with_hint(err))?;

    Ok((Some(child), ws_url))
}

/// Extracts the DevTools websocket URL from Chromium stderr output.
async fn extract_ws_url(child: &mut Child) -> Result<String, String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "chromium process missing stderr handle".to_string())?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| err.to_string())?;
            captured.push(line.clone());
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
        }
        Err(format!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            captured
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        ))
    };

    tokio::time::timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| "timed out waiting for chromium devtools websocket url".to_string())?
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
    mut event_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), ProbeError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, ProbeError>>> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                handle_command(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        handle_response(resp, &mut inflight);
                    }
                    Some(Ok(Message::Event(event))) => {
                        if let Err(err) = handle_event(event, &mut event_tx).await {
                            warn!(target: "cdp-probe", %err, "failed to forward event");
                        }
                    }
                    Some(Err(err)) => {
                        let probe_err = map_cdp_error(err);
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(probe_err.clone()));
                        }
                        return Err(probe_err);
                    }
                    None => {
                        let err = ProbeError::new(ProbeErrorKind::CdpIo)
                            .with_hint("cdp connection closed");
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(err.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn handle_command(
    conn: &mut Connection<CdpEventMessage>,
    cmd: ControlMessage,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ProbeError>>>,
) -> Result<(), ProbeError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let probe_err = ProbeError::new(ProbeErrorKind::CdpIo).with_hint(err.to_string());
            let _ = cmd.responder.send(Err(probe_err.clone()));
            Err(probe_err)
        }
    }
}

fn handle_response(
    resp: Response,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ProbeError>>>,
) {
    let entry = inflight.remove(&resp.id);
    let result = extract_payload(resp);

    if let Some(sender) = entry {
        let _ = sender.send(result);
    }
}

async fn handle_event(
    event: CdpEventMessage,
    event_tx: &mut mpsc::Sender<TransportEvent>,
) -> Result<(), ProbeError> {
    let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
        ProbeError::new(ProbeErrorKind::Internal)
            .with_hint(format!("failed to decode cdp event: {err}"))
    })?;

    let payload = TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    };

    event_tx
        .send(payload)
        .await
        .map_err(|err| ProbeError::new(ProbeErrorKind::Internal).with_hint(err.to_string()))
}

fn extract_payload(resp: Response) -> Result<Value, ProbeError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        Err(ProbeError::new(ProbeErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message)))
    } else {
        Err(ProbeError::new(ProbeErrorKind::Internal).with_hint("empty cdp response"))
    }
}

fn map_cdp_error(err: CdpError) -> ProbeError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => ProbeError::new(ProbeErrorKind::NavTimeout).with_hint(hint),
        _ => ProbeError::new(ProbeErrorKind::CdpIo).with_hint(hint),
    }
}
