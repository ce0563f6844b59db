#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to connect to {host}:{port}: {detail}")]
    Connection { host: String, port: u16, detail: String },

    #[error("connection to {host}:{port} lost: {detail}")]
    Disconnected { host: String, port: u16, detail: String },

    #[error("subscribe ({topic}): {detail}")]
    Subscribe { topic: String, detail: String },

    #[error("publish ({topic}): {detail}")]
    Publish { topic: String, detail: String },

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    Channel(&'static str),
}

impl RelayError {
    /// `true` для ошибок установления соединения (кандидат на fallback).
    pub fn is_connection(&self) -> bool {
        matches!(self, RelayError::Connection { .. })
    }
}
