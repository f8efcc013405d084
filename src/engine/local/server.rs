//! Accepting side of the in-process engine

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::amf::AmfValue;
use crate::engine::{
    ApplicationListener, ConnectionHandle, ConnectionListener, ConnectionStats,
    IncomingBridgeHandle, MediaFrame, MediaFrameListener, NetStreamHandle, NetStreamListener,
    ServerHandle,
};
use crate::protocol::ErrorCode;

use super::client::LocalClientConnection;
use super::media::{LocalIncomingBridge, MediaListeners};
use super::{JobQueue, LocalNetwork};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct ServerState {
    port: Option<u16>,
    applications: HashMap<String, Weak<dyn ApplicationListener>>,
    connections: Vec<Weak<LocalConnection>>,
    stopped: bool,
}

pub(crate) struct LocalServer {
    network: Arc<LocalNetwork>,
    jobs: JobQueue,
    state: Mutex<ServerState>,
    me: Weak<LocalServer>,
}

impl LocalServer {
    pub(crate) fn new(network: Arc<LocalNetwork>, jobs: JobQueue) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            network,
            jobs,
            state: Mutex::new(ServerState::default()),
            me: me.clone(),
        })
    }

    /// Open a connection from `client` to application `app`
    ///
    /// Runs on the engine queue. The application sees the connection right
    /// away and decides later whether to accept it.
    pub(crate) fn open(
        &self,
        app: &str,
        client: Weak<LocalClientConnection>,
        peer_addr: SocketAddr,
    ) -> Result<Arc<LocalConnection>, ErrorCode> {
        let listener = {
            let state = lock(&self.state);
            if state.stopped {
                return Err(ErrorCode::FailedToConnectSocket);
            }
            state.applications.get(app).and_then(Weak::upgrade)
        };
        let Some(listener) = listener else {
            tracing::debug!(app, "Connect to unknown application");
            return Err(ErrorCode::ConnectCommandFailed);
        };

        let connection = LocalConnection::new(peer_addr, client, self.jobs.clone());
        {
            let mut state = lock(&self.state);
            state.connections.retain(|c| c.strong_count() > 0);
            state.connections.push(Arc::downgrade(&connection));
        }

        listener.on_connect(app, connection.clone());
        Ok(connection)
    }
}

impl ServerHandle for LocalServer {
    fn start(&self, port: u16) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.stopped {
            return Err(io::Error::new(io::ErrorKind::Other, "server stopped"));
        }
        if state.port.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "server already started",
            ));
        }
        self.network.bind(port, self.me.clone())?;
        state.port = Some(port);
        Ok(())
    }

    fn add_application(&self, name: &str, listener: Weak<dyn ApplicationListener>) {
        lock(&self.state)
            .applications
            .insert(name.to_string(), listener);
    }

    fn remove_application(&self, name: &str) {
        lock(&self.state).applications.remove(name);
    }

    fn stop(&self) {
        let connections = {
            let mut state = lock(&self.state);
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.applications.clear();
            if let Some(port) = state.port.take() {
                self.network.unbind(port);
            }
            std::mem::take(&mut state.connections)
        };

        for connection in connections.iter().filter_map(Weak::upgrade) {
            connection.shutdown();
        }
    }
}

#[derive(Default)]
struct ConnectionState {
    listener: Option<Weak<dyn ConnectionListener>>,
    streams: HashMap<u32, Arc<LocalNetStream>>,
    accepted: bool,
    closed: bool,
}

/// Server side of a local connection
pub(crate) struct LocalConnection {
    peer_addr: SocketAddr,
    client: Weak<LocalClientConnection>,
    jobs: JobQueue,
    state: Mutex<ConnectionState>,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
    me: Weak<LocalConnection>,
}

impl LocalConnection {
    fn new(
        peer_addr: SocketAddr,
        client: Weak<LocalClientConnection>,
        jobs: JobQueue,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            peer_addr,
            client,
            jobs,
            state: Mutex::new(ConnectionState::default()),
            in_bytes: AtomicU64::new(0),
            out_bytes: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    fn listener(&self) -> Option<Arc<dyn ConnectionListener>> {
        lock(&self.state).listener.as_ref().and_then(Weak::upgrade)
    }

    /// Mark the connection closed, returning its streams if it was open
    fn close(&self) -> Option<Vec<Arc<LocalNetStream>>> {
        let mut state = lock(&self.state);
        if state.closed {
            return None;
        }
        state.closed = true;
        Some(state.streams.drain().map(|(_, s)| s).collect())
    }

    fn notify_client_closed(&self) {
        let client = self.client.clone();
        self.jobs.post(move || {
            if let Some(client) = client.upgrade() {
                client.peer_closed(ErrorCode::PeerClosed);
            }
        });
    }

    /// The client opened a stream; runs on the engine queue
    pub(crate) fn create_stream(&self, id: u32) -> bool {
        let (stream, listener) = {
            let mut state = lock(&self.state);
            if !state.accepted || state.closed {
                return false;
            }
            let stream = LocalNetStream::new(id, self.me.clone(), self.jobs.clone());
            state.streams.insert(id, stream.clone());
            (stream, state.listener.clone())
        };

        if let Some(listener) = listener.and_then(|l| l.upgrade()) {
            listener.on_stream(stream);
        }
        true
    }

    pub(crate) fn deliver_command(
        &self,
        stream_id: u32,
        name: &str,
        params: AmfValue,
        transaction_id: f64,
        extra: Vec<AmfValue>,
    ) {
        let stream = lock(&self.state).streams.get(&stream_id).cloned();
        if let Some(stream) = stream {
            stream.deliver_command(name, params, transaction_id, extra);
        }
    }

    pub(crate) fn delete_stream(&self, stream_id: u32) {
        let stream = lock(&self.state).streams.remove(&stream_id);
        if let Some(stream) = stream {
            stream.peer_deleted();
        }
    }

    pub(crate) fn deliver_media(&self, stream_id: u32, frame: &MediaFrame) {
        self.in_bytes
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        let stream = lock(&self.state).streams.get(&stream_id).cloned();
        if let Some(stream) = stream {
            stream.media.deliver(frame);
        }
    }

    /// The client went away; runs on the engine queue
    pub(crate) fn client_closed(&self) {
        let Some(streams) = self.close() else {
            return;
        };
        for stream in streams {
            stream.peer_deleted();
        }
        if let Some(listener) = self.listener() {
            listener.on_disconnected();
        }
    }

    /// The server is going away: both ends are told
    fn shutdown(&self) {
        let Some(streams) = self.close() else {
            return;
        };
        for stream in streams {
            stream.detach_listener();
        }
        self.notify_client_closed();

        let listener = self.listener();
        self.jobs.post(move || {
            if let Some(listener) = listener {
                listener.on_disconnected();
            }
        });
    }

    fn send_status(
        &self,
        stream_id: u32,
        transaction_id: f64,
        code: &str,
        level: &str,
        description: &str,
    ) {
        let params = vec![
            AmfValue::Null,
            AmfValue::object([
                ("level", AmfValue::from(level)),
                ("code", AmfValue::from(code)),
                ("description", AmfValue::from(description)),
            ]),
        ];
        self.out_bytes.fetch_add(
            (code.len() + level.len() + description.len()) as u64,
            Ordering::Relaxed,
        );

        let client = self.client.clone();
        self.jobs.post(move || {
            if let Some(client) = client.upgrade() {
                client.deliver_command(stream_id, "onStatus", transaction_id, params);
            }
        });
    }
}

impl ConnectionHandle for LocalConnection {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn accept(&self, listener: Weak<dyn ConnectionListener>) {
        {
            let mut state = lock(&self.state);
            if state.closed || state.accepted {
                return;
            }
            state.accepted = true;
            state.listener = Some(listener);
        }

        let client = self.client.clone();
        self.jobs.post(move || {
            if let Some(client) = client.upgrade() {
                client.accepted();
            }
        });
    }

    fn reject(&self) {
        if self.close().is_some() {
            tracing::debug!(peer = %self.peer_addr, "Connection rejected");
            self.notify_client_closed();
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
        }
    }

    fn stop(&self) {
        let Some(streams) = self.close() else {
            return;
        };
        for stream in streams {
            stream.detach_listener();
        }
        self.notify_client_closed();
    }
}

/// A net-stream on the server side of a local connection
pub(crate) struct LocalNetStream {
    id: u32,
    connection: Weak<LocalConnection>,
    jobs: JobQueue,
    listener: Mutex<Option<Weak<dyn NetStreamListener>>>,
    media: MediaListeners,
}

impl LocalNetStream {
    fn new(id: u32, connection: Weak<LocalConnection>, jobs: JobQueue) -> Arc<Self> {
        Arc::new(Self {
            id,
            connection,
            jobs,
            listener: Mutex::new(None),
            media: MediaListeners::default(),
        })
    }

    fn listener(&self) -> Option<Arc<dyn NetStreamListener>> {
        lock(&self.listener).as_ref().and_then(Weak::upgrade)
    }

    fn deliver_command(
        &self,
        name: &str,
        params: AmfValue,
        transaction_id: f64,
        extra: Vec<AmfValue>,
    ) {
        if let Some(listener) = self.listener() {
            listener.on_command(name, params, transaction_id, extra);
        }
    }

    fn peer_deleted(&self) {
        self.media.clear();
        if let Some(listener) = self.listener() {
            listener.on_stopped();
        }
    }

    fn detach_listener(&self) {
        self.media.clear();
        lock(&self.listener).take();
    }
}

impl NetStreamHandle for LocalNetStream {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_listener(&self, listener: Weak<dyn NetStreamListener>) {
        *lock(&self.listener) = Some(listener);
    }

    fn reset_listener(&self) {
        lock(&self.listener).take();
    }

    fn send_status(&self, transaction_id: f64, code: &str, level: &str, description: &str) {
        if let Some(connection) = self.connection.upgrade() {
            connection.send_status(self.id, transaction_id, code, level, description);
        }
    }

    fn create_incoming_bridge(
        &self,
        max_late_offset: u32,
        max_buffering_time: u32,
    ) -> Arc<dyn IncomingBridgeHandle> {
        Arc::new(LocalIncomingBridge::new(
            max_late_offset,
            max_buffering_time,
            self.jobs.clone(),
        ))
    }

    fn add_media_listener(&self, listener: Arc<dyn MediaFrameListener>) {
        self.media.add(listener);
    }

    fn remove_media_listener(&self, listener: &Arc<dyn MediaFrameListener>) {
        self.media.remove(listener);
    }
}
