//! Accepted inbound connection

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::engine::{ConnectionHandle, ConnectionListener, ConnectionStats, NetStreamHandle};
use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::session::{Stream, StreamEvent};

/// Events raised by a [`Client`]
#[derive(Clone)]
pub enum ClientEvent {
    /// The peer opened a net-stream
    Stream(Arc<Stream>),
    Stopped,
}

impl std::fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::Stream(stream) => f.debug_tuple("Stream").field(&stream.id()).finish(),
            ClientEvent::Stopped => f.write_str("Stopped"),
        }
    }
}

#[derive(Default)]
struct ClientState {
    connection: Option<Arc<dyn ConnectionHandle>>,
    streams: HashMap<u32, Arc<Stream>>,
    accepted: bool,
}

/// One inbound RTMP connection of an [`Application`](super::Application)
pub struct Client {
    id: Uuid,
    app_name: String,
    peer_addr: SocketAddr,
    runtime: Handle,
    state: Mutex<ClientState>,
    events: Emitter<ClientEvent>,
    me: Weak<Client>,
}

impl Client {
    pub(crate) fn new(
        connection: Arc<dyn ConnectionHandle>,
        app_name: &str,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: Uuid::new_v4(),
            app_name: app_name.to_string(),
            peer_addr: connection.peer_addr(),
            runtime,
            state: Mutex::new(ClientState {
                connection: Some(connection),
                ..Default::default()
            }),
            events: Emitter::new(),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Application name the peer connected to
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn events(&self) -> &Emitter<ClientEvent> {
        &self.events
    }

    fn connection(&self) -> Option<Arc<dyn ConnectionHandle>> {
        self.lock().connection.clone()
    }

    /// Accept the connection; the peer gets its connect result and may open streams
    pub fn accept(&self) -> Result<()> {
        let connection = {
            let mut state = self.lock();
            let connection = state.connection.clone().ok_or(Error::Stopped("client"))?;
            if state.accepted {
                return Ok(());
            }
            state.accepted = true;
            connection
        };

        tracing::info!(
            client_id = %self.id,
            app = %self.app_name,
            peer = %self.peer_addr,
            "Client accepted"
        );
        let listener: Weak<dyn ConnectionListener> = self.me.clone();
        connection.accept(listener);
        Ok(())
    }

    /// Refuse the connection and stop the client
    pub fn reject(&self) {
        let Some(connection) = self.connection() else {
            return;
        };

        tracing::info!(
            client_id = %self.id,
            app = %self.app_name,
            peer = %self.peer_addr,
            "Client rejected"
        );
        connection.reject();
        self.stop();
    }

    pub fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.lock().streams.get(&id).cloned()
    }

    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.lock().streams.values().cloned().collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connection()
            .map(|c| c.stats())
            .unwrap_or_default()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().connection.is_none()
    }

    /// Stop every stream and close the connection
    pub fn stop(&self) {
        let (connection, streams) = {
            let mut state = self.lock();
            let Some(connection) = state.connection.take() else {
                return;
            };
            (connection, std::mem::take(&mut state.streams))
        };

        for stream in streams.into_values() {
            stream.stop();
        }
        connection.stop();

        tracing::debug!(client_id = %self.id, "Client stopped");
        self.events.emit(ClientEvent::Stopped);
        self.events.close();
    }

    fn remove_stream(&self, stream: &Weak<Stream>) {
        let mut state = self.lock();
        state
            .streams
            .retain(|_, s| !std::ptr::eq(Arc::as_ptr(s), stream.as_ptr()));
    }
}

impl ConnectionListener for Client {
    fn on_stream(&self, net_stream: Arc<dyn NetStreamHandle>) {
        if self.is_stopped() {
            return;
        }

        let stream = Stream::new(net_stream, &self.runtime);
        tracing::debug!(client_id = %self.id, stream_id = stream.id(), "Stream created");

        let client = self.me.clone();
        let weak = Arc::downgrade(&stream);
        stream.events().on(move |event| {
            if matches!(event, StreamEvent::Stopped) {
                if let Some(client) = client.upgrade() {
                    client.remove_stream(&weak);
                }
            }
        });

        let replaced = self.lock().streams.insert(stream.id(), stream.clone());
        if let Some(previous) = replaced {
            previous.stop();
        }
        self.events.emit(ClientEvent::Stream(stream));
    }

    fn on_disconnected(&self) {
        tracing::info!(client_id = %self.id, peer = %self.peer_addr, "Client disconnected");
        self.stop();
    }
}
