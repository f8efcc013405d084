//! Stream and track bridges
//!
//! An [`IncomingStreamBridge`] exposes the media of an inbound net-stream, an
//! [`OutgoingStreamBridge`] feeds a stream published on a client connection.
//! Attaching the latter to the former moves media from one side to the other.

pub mod config;
pub mod incoming;
pub mod incoming_track;
pub mod outgoing;
pub mod outgoing_track;

pub use config::BridgeConfig;
pub use incoming::{IncomingStreamBridge, IncomingStreamEvent};
pub use incoming_track::{Encoding, IncomingStreamTrackBridge, IncomingTrackEvent};
pub use outgoing::{OutgoingStreamBridge, OutgoingStreamEvent};
pub use outgoing_track::{OutgoingStreamTrackBridge, OutgoingTrackEvent};
