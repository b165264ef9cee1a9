//! `echo`: returns its input. Runs off the host thread.

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::schema::InputSchema;

#[derive(Debug, Deserialize, Serialize)]
pub struct EchoArgs {
    pub text: String,
}

pub fn capability() -> Capability {
    Capability::sync(
        "echo",
        "Return the given text unchanged",
        InputSchema::new().string("text", "Text to echo back"),
        |args: EchoArgs| Ok(args),
    )
}
