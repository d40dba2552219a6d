//! Error types for messaging operations

use strum::Display;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// How the broker client classified a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BrokerErrorKind {
    /// Unrecoverable: connectivity, authentication, protocol or commit failure
    Fatal,
    /// Scoped to a single record (bad payload, partition EOF); the loop skips it
    Transient,
}

/// Failure reported by a broker client primitive
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} broker error: {message}")]
pub struct BrokerError {
    /// Classification used by the consumer loop
    pub kind: BrokerErrorKind,
    /// Human readable cause
    pub message: String,
}

impl BrokerError {
    /// Create a fatal broker error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Create a transient, per-record broker error
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Whether this error must terminate a consumer loop
    pub fn is_fatal(&self) -> bool {
        self.kind == BrokerErrorKind::Fatal
    }
}

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// A caller supplied a blank or otherwise unusable value
    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    /// A mandatory settings key is missing or blank
    #[error("Missing mandatory setting `{key}`")]
    MissingSetting { key: String },

    /// The component is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Broker-domain failure while talking to a destination
    #[error("Broker transfer failed during {operation} on `{destination}`: {source}")]
    BrokerTransfer {
        destination: String,
        operation: &'static str,
        #[source]
        source: BrokerError,
    },

    /// A message handler failed with a non-broker error
    #[error("Handler failed on `{destination}`: {source}")]
    Handler {
        destination: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MessagingError {
    pub(crate) fn invalid_argument(name: &str, reason: &str) -> Self {
        MessagingError::InvalidArgument {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn broker(destination: &str, operation: &'static str, source: BrokerError) -> Self {
        MessagingError::BrokerTransfer {
            destination: destination.to_string(),
            operation,
            source,
        }
    }

    /// Whether this error belongs to the broker domain.
    ///
    /// Broker-domain errors are never dead-lettered: they are the consumer
    /// loop's concern.
    pub fn is_broker_error(&self) -> bool {
        matches!(self, MessagingError::BrokerTransfer { .. })
    }

    /// Whether an arbitrary handler error is a broker-domain error.
    ///
    /// The whole cause chain is inspected, so a `BrokerError` or a
    /// `BrokerTransfer` wrapped as the source of an application error counts.
    pub fn is_broker_error_in(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            cause.is::<BrokerError>()
                || cause
                    .downcast_ref::<MessagingError>()
                    .map_or(false, MessagingError::is_broker_error)
        })
    }

    /// First broker-domain failure in a handler error's cause chain, as a
    /// `BrokerTransfer`. A bare `BrokerError` is attributed to `destination`.
    pub fn broker_error_in(destination: &str, err: &anyhow::Error) -> Option<Self> {
        err.chain().find_map(|cause| {
            if let Some(MessagingError::BrokerTransfer {
                destination,
                operation,
                source,
            }) = cause.downcast_ref::<MessagingError>()
            {
                return Some(MessagingError::broker(destination, *operation, source.clone()));
            }
            cause
                .downcast_ref::<BrokerError>()
                .map(|source| MessagingError::broker(destination, "handle", source.clone()))
        })
    }
}

impl From<config::ConfigError> for MessagingError {
    fn from(err: config::ConfigError) -> Self {
        MessagingError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for MessagingError {
    fn from(err: validator::ValidationErrors) -> Self {
        MessagingError::Configuration(err.to_string())
    }
}

/// Reject blank strings with `InvalidArgument`
pub(crate) fn require_non_blank(name: &str, value: &str) -> MessagingResult<()> {
    if value.trim().is_empty() {
        return Err(MessagingError::invalid_argument(name, "must not be blank"));
    }
    Ok(())
}
