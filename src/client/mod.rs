//! Outbound side
//!
//! A [`ClientConnection`] connects to a remote RTMP endpoint and publishes
//! streams on it, each fed through an
//! [`OutgoingStreamBridge`](crate::bridge::OutgoingStreamBridge).

pub mod command;
pub mod config;
pub mod connection;

pub use command::{CompletionToken, PendingCommand, PendingRequests};
pub use config::{ClientConfig, ParsedUrl};
pub use connection::{ClientConnection, ClientConnectionEvent, ConnectionState};
