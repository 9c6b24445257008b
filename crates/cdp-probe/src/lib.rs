//! Chromium DevTools Protocol driver for one evidence-collection session.
//!
//! The probe launches (or connects to) a Chromium instance, attaches to a
//! single page target and exposes the narrow surface the collector needs:
//! init-script installation, an event binding into the page, the network
//! and runtime event stream, navigation with timeout, cookie-jar and DOM
//! storage reads, and screenshots. Commands travel as raw CDP method
//! strings with JSON params over one websocket connection; typed decoding
//! happens at this crate's edge.

pub mod events;
pub mod probe;
pub mod registry;
pub mod transport;

pub use events::ProbeEvent;
pub use probe::PageProbe;
pub use registry::FrameRegistry;

use std::path::PathBuf;

pub mod error {
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the probe.
    #[derive(Clone, Debug, Error)]
    pub enum ProbeErrorKind {
        #[error("navigation failed")]
        NavFailed,
        #[error("navigation timed out")]
        NavTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("browser launch failed")]
        Launch,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error passed back to the session layer.
    #[derive(Clone, Debug)]
    pub struct ProbeError {
        pub kind: ProbeErrorKind,
        pub hint: Option<String>,
    }

    impl ProbeError {
        pub fn new(kind: ProbeErrorKind) -> Self {
            Self { kind, hint: None }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        /// A primary-navigation failure aborts the whole session.
        pub fn is_fatal_navigation(&self) -> bool {
            matches!(
                self.kind,
                ProbeErrorKind::NavFailed | ProbeErrorKind::NavTimeout
            )
        }
    }

    impl fmt::Display for ProbeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for ProbeError {}
}

pub use error::{ProbeError, ProbeErrorKind};

/// Launch configuration for the probed browser.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub executable: PathBuf,
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub window_width: u32,
    pub window_height: u32,
    /// Extra arguments appended to the Chromium command line.
    pub browser_args: Vec<String>,
    /// Deadline for individual CDP commands.
    pub default_deadline_ms: u64,
    /// Attach to an already running browser instead of launching one.
    pub websocket_url: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            executable: default_chrome_path(),
            user_data_dir: None,
            headless: true,
            user_agent: concat!(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 ",
                "(KHTML, like Gecko) Chrome/116.0.5845.96 Safari/537.36",
            )
            .to_string(),
            accept_language: "en".to_string(),
            window_width: 1680,
            window_height: 927,
            browser_args: Vec::new(),
            default_deadline_ms: 30_000,
            websocket_url: None,
        }
    }
}

fn default_chrome_path() -> PathBuf {
    if let Ok(path) = std::env::var("WEC_CHROME") {
        return PathBuf::from(path);
    }
    for candidate in [
        "chromium",
        "chromium-browser",
        "google-chrome",
        "google-chrome-stable",
        "chrome",
    ] {
        if let Ok(found) = which::which(candidate) {
            return found;
        }
    }
    PathBuf::new()
}
