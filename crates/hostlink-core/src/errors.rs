/// Machine-readable codes, one per failure class.
pub const ARGUMENT_MISMATCH: &str = "ARGUMENT_MISMATCH";
pub const CAPABILITY_NOT_FOUND: &str = "CAPABILITY_NOT_FOUND";
pub const PROVIDER_FAILURE: &str = "PROVIDER_FAILURE";
pub const TRANSPORT_FAILURE: &str = "TRANSPORT_FAILURE";
pub const PARSE_FAILURE: &str = "PARSE_FAILURE";

/// Failure of a single capability invocation. Reported to the caller inside
/// the protocol envelope; the session stays open.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("invalid arguments for '{capability}': {message}")]
    ArgumentMismatch { capability: String, message: String },

    #[error("capability '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    ProviderFailure(String),
}

impl CapabilityError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::ProviderFailure(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ArgumentMismatch { .. } => ARGUMENT_MISMATCH,
            Self::NotFound(_) => CAPABILITY_NOT_FOUND,
            Self::ProviderFailure(_) => PROVIDER_FAILURE,
        }
    }
}

/// Failure on a session's transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Writing to the outbound sink failed; the session is closed.
    #[error("sink write failed: {0}")]
    SinkFailed(String),

    /// The session was already closed.
    #[error("session closed")]
    Closed,

    /// An inbound payload could not be decoded. The message is dropped and
    /// the session stays open.
    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => PARSE_FAILURE,
            _ => TRANSPORT_FAILURE,
        }
    }
}

/// Umbrella over every failure class that can cross a component boundary.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Capability(e) => e.code(),
            Self::Transport(e) => e.code(),
        }
    }
}
