//! Built-in capability providers.

pub mod echo;
pub mod host_state;
