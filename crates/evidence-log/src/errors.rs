use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log sink unavailable: {0}")]
    SinkUnavailable(String),
    #[error("log sink write failed: {0}")]
    SinkWrite(String),
}
