#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Relay(#[from] score_relay::RelayError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
