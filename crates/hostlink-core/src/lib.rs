//! Shared types for hostlink: session tokens, the JSON-RPC envelope and the
//! error taxonomy every other crate reports through.

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::{BridgeError, CapabilityError, TransportError};
pub use ids::SessionToken;
pub use protocol::{JsonRpcMessage, RequestId};
