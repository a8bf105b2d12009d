#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Could not reach the broker at all.
    #[error("broker connect {bootstrap}: {detail}")]
    Connect { bootstrap: String, detail: String },

    #[error("broker: {0}")]
    Broker(String),

    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    /// Every source feeding the subscription is gone.
    #[error("subscription closed")]
    Closed,

    #[error("config: {0}")]
    Config(String),
}

impl BusError {
    pub fn broker(e: impl std::fmt::Display) -> Self {
        BusError::Broker(e.to_string())
    }
}
