use hostlink_core::CapabilityError;

/// Why a submitted work item did not produce a value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The work panicked on the host thread. The pump kept running.
    #[error("host work panicked: {0}")]
    Panicked(String),

    /// The work returned an error.
    #[error("host work failed: {0}")]
    Failed(String),

    /// A bounded queue was full at submission time.
    #[error("host queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// The pump was dropped before the work completed.
    #[error("host pump stopped")]
    PumpStopped,
}

impl From<HostError> for CapabilityError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Failed(message) => CapabilityError::ProviderFailure(message),
            other => CapabilityError::ProviderFailure(other.to_string()),
        }
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
