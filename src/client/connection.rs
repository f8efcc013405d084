//! Outbound RTMP connection
//!
//! States: `Idle -> Connecting -> Connected -> Stopped`, or
//! `Connecting -> Disconnected -> Stopped` when the engine reports a failure.
//! A disconnection always stops the connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;

use crate::amf::AmfValue;
use crate::bridge::{OutgoingStreamBridge, OutgoingStreamEvent};
use crate::engine::{ClientConnectionHandle, ClientConnectionListener, ConnectionStats, Engine};
use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::protocol::ErrorCode;

use super::command::PendingRequests;
use super::config::ClientConfig;

/// Lifecycle state of a [`ClientConnection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

/// Events raised by a [`ClientConnection`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientConnectionEvent {
    Connected,
    /// Raised once per failed or closed connection, right before `Stopped`
    Disconnected(ErrorCode),
    /// Connection-level command sent by the peer
    Command { name: String, params: Vec<AmfValue> },
    Stopped,
}

#[derive(Default)]
struct Inner {
    handle: Option<Arc<dyn ClientConnectionHandle>>,
    streams: HashMap<u32, Arc<OutgoingStreamBridge>>,
}

pub struct ClientConnection {
    state: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    requests: PendingRequests,
    events: Emitter<ClientConnectionEvent>,
    me: Weak<ClientConnection>,
}

impl ClientConnection {
    pub fn new(engine: &dyn Engine) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<ClientConnection>| {
            let listener: Weak<dyn ClientConnectionListener> = me.clone();
            let handle = engine.create_client_connection(listener);
            let (state, _) = watch::channel(ConnectionState::Idle);
            Self {
                state,
                inner: Mutex::new(Inner {
                    handle: Some(handle),
                    streams: HashMap::new(),
                }),
                requests: PendingRequests::new(),
                events: Emitter::new(),
                me: me.clone(),
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self) -> Option<Arc<dyn ClientConnectionHandle>> {
        self.lock().handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ConnectionState::Stopped
    }

    pub fn events(&self) -> &Emitter<ClientConnectionEvent> {
        &self.events
    }

    /// Start connecting to `server:port/app`
    ///
    /// Only failures known right away (an unresolvable host) are returned.
    /// Everything else is reported later with a
    /// [`Disconnected`](ClientConnectionEvent::Disconnected) event.
    pub fn connect(&self, server: &str, port: u16, app: &str) -> ErrorCode {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !transitioned {
            tracing::warn!(state = ?self.state(), "connect() called on a used connection");
            return ErrorCode::Generic;
        }
        let Some(handle) = self.handle() else {
            return ErrorCode::Generic;
        };

        tracing::info!(server, port, app, "Connecting");
        let code = handle.connect(server, port, app);
        if code.is_error() {
            tracing::warn!(server, port, error = %code, "Connect failed");
            self.state.send_if_modified(|state| {
                let reset = *state == ConnectionState::Connecting;
                if reset {
                    *state = ConnectionState::Idle;
                }
                reset
            });
        }
        code
    }

    /// Connect to the server and application named by an `rtmp://` url
    pub fn connect_with(&self, config: &ClientConfig) -> Result<ErrorCode> {
        let url = config.parse_url()?;
        Ok(self.connect(&url.host, url.port, &url.app))
    }

    async fn wait_connected(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {}
                ConnectionState::Stopped => return Err(Error::Stopped("client connection")),
                ConnectionState::Idle | ConnectionState::Disconnected => {
                    return Err(Error::NotConnected)
                }
            }
            if state.changed().await.is_err() {
                return Err(Error::NotConnected);
            }
        }
    }

    /// Create a stream, publish `name` on it and return its outgoing bridge
    ///
    /// Waits for the connection to complete if it is still connecting. When
    /// the returned bridge stops, the stream is deleted on the peer.
    pub async fn publish(&self, name: &str) -> Result<Arc<OutgoingStreamBridge>> {
        self.wait_connected().await?;
        let handle = self.handle().ok_or(Error::Stopped("client connection"))?;

        let (token, reply) = self.requests.register("createStream");
        handle.create_stream(token);
        let reply = reply.await?;

        let stream_id = reply
            .get(1)
            .and_then(AmfValue::as_number)
            .filter(|id| *id >= 1.0 && *id <= u32::MAX as f64)
            .ok_or_else(|| Error::InvalidResponse {
                command: "createStream",
                reason: format!("no stream id in {reply:?}"),
            })? as u32;

        // No deleteStream here: the peer drops the stream with the connection.
        if self.is_stopped() {
            return Err(Error::Stopped("client connection"));
        }

        handle.publish(stream_id, name);
        let bridge = OutgoingStreamBridge::new(stream_id, handle.create_outgoing_bridge(stream_id));

        let me = self.me.clone();
        bridge.events().on(move |event| {
            if matches!(event, OutgoingStreamEvent::Stopped) {
                if let Some(me) = me.upgrade() {
                    me.on_stream_stopped(stream_id);
                }
            }
        });
        self.lock().streams.insert(stream_id, bridge.clone());

        tracing::info!(stream_id, name, "Publishing");
        Ok(bridge)
    }

    fn on_stream_stopped(&self, stream_id: u32) {
        let handle = {
            let mut inner = self.lock();
            inner.streams.remove(&stream_id);
            inner.handle.clone()
        };
        let Some(handle) = handle else {
            return;
        };
        if self.is_stopped() {
            return;
        }

        // Best effort: the reply is not awaited.
        let (token, _reply) = self.requests.register("deleteStream");
        handle.delete_stream(stream_id, token);
        tracing::debug!(stream_id, "Stream deleted");
    }

    pub fn stream(&self, stream_id: u32) -> Option<Arc<OutgoingStreamBridge>> {
        self.lock().streams.get(&stream_id).cloned()
    }

    pub fn streams(&self) -> Vec<Arc<OutgoingStreamBridge>> {
        self.lock().streams.values().cloned().collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.handle().map(|h| h.stats()).unwrap_or_default()
    }

    /// Stop every published stream and close the connection
    pub fn stop(&self) {
        let previous = self.state.send_replace(ConnectionState::Stopped);
        if previous == ConnectionState::Stopped {
            return;
        }

        let streams = std::mem::take(&mut self.lock().streams);
        for bridge in streams.into_values() {
            bridge.stop();
        }

        tracing::info!("Client connection stopped");
        self.events.emit(ClientConnectionEvent::Stopped);

        if let Some(handle) = self.lock().handle.take() {
            handle.stop();
        }
        self.events.close();
    }
}

impl ClientConnectionListener for ClientConnection {
    fn on_connected(&self) {
        let connected = self.state.send_if_modified(|state| {
            let connected = *state == ConnectionState::Connecting;
            if connected {
                *state = ConnectionState::Connected;
            }
            connected
        });
        if connected {
            tracing::info!("Connected");
            self.events.emit(ClientConnectionEvent::Connected);
        }
    }

    fn on_disconnected(&self, code: ErrorCode) {
        let disconnected = self.state.send_if_modified(|state| {
            let live = matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            if live {
                *state = ConnectionState::Disconnected;
            }
            live
        });
        if !disconnected {
            return;
        }

        tracing::info!(error = %code, "Disconnected");
        self.events.emit(ClientConnectionEvent::Disconnected(code));
        self.stop();
    }

    fn on_command(&self, stream_id: u32, name: &str, params: Vec<AmfValue>) {
        if self.is_stopped() {
            return;
        }

        tracing::trace!(stream_id, command = name, "Command received");
        if stream_id == 0 {
            self.events.emit(ClientConnectionEvent::Command {
                name: name.to_string(),
                params,
            });
        } else if let Some(bridge) = self.stream(stream_id) {
            bridge.on_command(name, params);
        }
    }
}
