use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use hostlink_core::CapabilityError;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::capability::CapabilityDescriptor;
use crate::registry::CapabilityRegistry;

/// Calls slower than this are logged.
const SLOW_CALL_SECS: f64 = 5.0;

/// The two operations sessions perform against the registry.
#[derive(Clone)]
pub struct CapabilityFacade {
    registry: Arc<CapabilityRegistry>,
}

impl CapabilityFacade {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.registry.list_all()
    }

    /// Invoke `name`. Unknown names yield [`CapabilityError::NotFound`] and a
    /// panicking capability yields [`CapabilityError::ProviderFailure`];
    /// anything else the capability returns is passed through unchanged.
    pub async fn call_capability(&self, name: &str, args: Value) -> Result<Value, CapabilityError> {
        let Some(capability) = self.registry.get(name) else {
            counter!("capability_calls_total", "capability" => name.to_owned(), "outcome" => "not_found")
                .increment(1);
            debug!(capability = name, "capability not found");
            return Err(CapabilityError::NotFound(name.to_string()));
        };

        let start = Instant::now();
        // Synchronous bodies run inside `invoke`, so defer it into the guarded future.
        let result = AssertUnwindSafe(async { capability.invoke(args).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                error!(capability = name, %reason, "capability panicked");
                Err(CapabilityError::provider(format!("capability '{name}' panicked: {reason}")))
            });
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = match &result {
            Ok(_) => "ok",
            Err(CapabilityError::ArgumentMismatch { .. }) => "argument_mismatch",
            Err(CapabilityError::NotFound(_)) => "not_found",
            Err(CapabilityError::ProviderFailure(_)) => "provider_failure",
        };
        counter!("capability_calls_total", "capability" => name.to_owned(), "outcome" => outcome)
            .increment(1);
        histogram!("capability_call_duration_seconds", "capability" => name.to_owned())
            .record(elapsed);

        match &result {
            Err(e) => debug!(capability = name, code = e.code(), error = %e, "capability failed"),
            Ok(_) if elapsed >= SLOW_CALL_SECS => {
                warn!(capability = name, duration_secs = elapsed, "slow capability call");
            }
            Ok(_) => debug!(capability = name, duration_secs = elapsed, "capability call"),
        }
        result
    }
}
