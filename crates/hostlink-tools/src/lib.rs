//! # hostlink-tools
//!
//! Capabilities callable by sessions: the registry they live in, the facade
//! sessions call through, and the built-in providers.

mod capability;
mod facade;
pub mod providers;
mod registry;
mod schema;

pub use capability::{Capability, CapabilityDescriptor, Invoker, NoArgs};
pub use facade::CapabilityFacade;
pub use hostlink_core::CapabilityError;
pub use providers::host_state::{HostState, HostStateTools, SpawnedObject, Vec3};
pub use registry::{CapabilityProvider, CapabilityRegistry, RegistryBuilder, RegistryError};
pub use schema::InputSchema;

use std::sync::Arc;

use hostlink_host::HostDispatcher;

/// Registry with every built-in capability: `echo` plus the host-state demo
/// provider bound to `dispatcher`.
pub fn default_registry(
    dispatcher: HostDispatcher<HostState>,
) -> Result<CapabilityRegistry, RegistryError> {
    RegistryBuilder::new()
        .function(providers::echo::capability())
        .provider(Arc::new(HostStateTools::new(dispatcher)))
        .build()
}
