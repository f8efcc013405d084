//! RTMP session and media bridging layer
//!
//! This crate drives an external media engine through the traits in
//! [`engine`] and exposes an event-driven API on top of it:
//!
//! - [`Server`] listens on a port and routes connections to [`Application`]s
//! - every inbound connection is a [`Client`](server::Client) that the
//!   application accepts or rejects; its net-streams surface as
//!   [`Stream`](session::Stream)s carrying `publish` and other commands
//! - an [`IncomingStreamBridge`] exposes the media of a stream as tracks with
//!   per-encoding statistics
//! - a [`ClientConnection`] connects out, publishes streams and feeds them
//!   through an [`OutgoingStreamBridge`] attached to an incoming one
//!
//! [`LocalEngine`] implements the engine in-process, which is enough to
//! restream between applications of the same process and to test.
//!
//! # Example
//!
//! ```no_run
//! use rtmp_bridge::{Application, ApplicationEvent, LocalEngine, Server};
//!
//! # async fn run() -> rtmp_bridge::Result<()> {
//! let engine = LocalEngine::new();
//! let server = Server::new(&engine);
//! let app = Application::new();
//!
//! app.events().on(|event| {
//!     if let ApplicationEvent::Connect(client) = event {
//!         let _ = client.accept();
//!     }
//! });
//!
//! server.add_application("live", &app);
//! server.start(1935)?;
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod bridge;
pub mod client;
pub mod engine;
pub mod error;
pub mod event;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use amf::AmfValue;
pub use bridge::{BridgeConfig, IncomingStreamBridge, OutgoingStreamBridge};
pub use client::{ClientConfig, ClientConnection, ClientConnectionEvent, ConnectionState};
pub use engine::local::LocalEngine;
pub use engine::{Engine, MediaFrame, MediaKind};
pub use error::{CommandError, Error, Result, ValidationError};
pub use event::{Emitter, ListenerId};
pub use protocol::{ErrorCode, Status, StatusLevel};
pub use server::{Application, ApplicationEvent, Server, ServerConfig};
pub use session::{Stream, StreamEvent};
