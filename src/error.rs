//! Error types for Pushline
//!
//! The main error enum groups failures by the subsystem they originate in
//! (configuration, transport client, offset persistence) so callers can
//! match on the domain without inspecting message strings.

use thiserror::Error;

/// Result type alias for Pushline operations
pub type Result<T> = std::result::Result<T, PushlineError>;

/// Structured configuration error domain
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(String),
    #[error("{setting}: {reason}")]
    InvalidSetting { setting: String, reason: String },
    #[error("bad subscription expression for topic {topic}: {expression:?}")]
    BadExpression { topic: String, expression: String },
}

impl ConfigError {
    pub fn missing(setting: impl Into<String>) -> Self {
        Self::Missing(setting.into())
    }

    pub fn invalid_setting(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    pub fn bad_expression(topic: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::BadExpression {
            topic: topic.into(),
            expression: expression.into(),
        }
    }
}

/// Structured transport-client error domain
#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("broker address not found: {broker_name}[{broker_id}]")]
    BrokerNotFound { broker_name: String, broker_id: u64 },
    #[error("no route for topic {0}")]
    RouteNotFound(String),
    #[error("{operation}: {detail}")]
    Rpc { operation: String, detail: String },
    #[error("client not ready: {0}")]
    NotReady(String),
    #[error("{0}")]
    Message(String),
}

impl ClientError {
    pub fn broker_not_found(broker_name: impl Into<String>, broker_id: u64) -> Self {
        Self::BrokerNotFound {
            broker_name: broker_name.into(),
            broker_id,
        }
    }

    pub fn rpc(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Rpc {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Structured offset-store error domain
#[derive(Debug, Error, Clone)]
pub enum OffsetError {
    #[error("load {path}: {detail}")]
    Load { path: String, detail: String },
    #[error("persist {queue}: {detail}")]
    Persist { queue: String, detail: String },
}

impl OffsetError {
    pub fn load(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn persist(queue: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Persist {
            queue: queue.into(),
            detail: detail.into(),
        }
    }
}

/// Main error type for Pushline
#[derive(Error, Debug)]
pub enum PushlineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Offset error: {0}")]
    Offset(#[from] OffsetError),

    #[error("Delivery not acknowledged for {queue} within {timeout_millis}ms")]
    DeliveryTimeout { queue: String, timeout_millis: u64 },

    #[error("Consumer is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PushlineError {
    /// Whether a pull worker recovers from this error with a back-off and
    /// retry. Non-retriable errors (bad configuration, shutdown) end the
    /// worker instead.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            PushlineError::Config(_) | PushlineError::ShuttingDown
        )
    }
}
