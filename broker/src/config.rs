use dispatcher::AcceptRule;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    Load(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty endpoint name")]
    EmptyEndpointName,

    #[error("Duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),

    #[error("Packet size cannot be 0")]
    InvalidPacketSize,

    #[error("Body limit cannot be 0")]
    InvalidBodyLimit,
}

/// Broker configuration, loaded once at startup. Endpoint registrations can
/// still change afterwards through the dispatcher's `set`/`remove`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming client requests
    pub listener: Listener,
    /// The document store every queue talks to
    pub backend: Backend,
    #[serde(default)]
    pub limits: Limits,
    /// Endpoint registrations, scanned in file order during routing
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.backend.packet_size == 0 {
            return Err(ValidationError::InvalidPacketSize);
        }

        if self.limits.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() {
                return Err(ValidationError::EmptyEndpointName);
            }

            if !names.insert(&endpoint.name) {
                return Err(ValidationError::DuplicateEndpoint(endpoint.name.clone()));
            }

            if endpoint.packet_size == Some(0) {
                return Err(ValidationError::InvalidPacketSize);
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Backend {
    /// Base URL of the document store
    ///
    /// Note: Uses the `url::Url` type so malformed URLs are rejected during
    /// config deserialization.
    pub url: Url,
    /// Packet size applied to endpoints without their own
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Limits {
    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_packet_size() -> usize {
    dispatcher::queue::DEFAULT_PACKET_SIZE
}

const fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

/// One queue registration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default = "default_rule")]
    pub rule: AcceptRule,
    pub packet_size: Option<usize>,
    #[serde(default)]
    pub hidden: bool,
}

fn default_rule() -> AcceptRule {
    AcceptRule::Any
}
