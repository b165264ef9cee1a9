//! HTTP/SSE front of the bridge.
//!
//! Each `GET {base}/sse` opens a [`SessionTransport`] registered in the
//! [`SessionDirectory`]; payloads posted to `{base}/message?sessionId=..` are
//! queued on that session and answered over its stream by the protocol loop.

pub mod directory;
pub mod frame;
pub mod health;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod transport;

pub use directory::{DirectoryError, SessionDirectory};
pub use health::HealthResponse;
pub use protocol::{ProtocolHandler, ServerInfo, DEFAULT_PROTOCOL_VERSION};
pub use server::{AppState, HostlinkServer, ServerHandle};
pub use session::run_session;
pub use shutdown::ShutdownCoordinator;
pub use sink::{ChannelSink, EventSink};
pub use transport::{SessionTransport, TransportState};
