use thiserror::Error;

/// Errors surfaced by the broker's HTTP boundary.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported route method: {0}")]
    UnsupportedMethod(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
