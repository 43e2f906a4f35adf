//! LAN chat: a nickname handshake over TCP followed by free-text chat and a
//! handful of slash-commands, relayed by a central server.

pub mod client;
pub mod common;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use error::{ChatError, Result};
