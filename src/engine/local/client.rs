//! Connecting side of the in-process engine

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::amf::AmfValue;
use crate::client::command::CompletionToken;
use crate::engine::{
    ClientConnectionHandle, ClientConnectionListener, ConnectionStats, MediaFrame,
    OutgoingBridgeHandle,
};
use crate::protocol::{net_connection, ErrorCode};

use super::media::LocalOutgoingBridge;
use super::server::LocalConnection;
use super::{JobQueue, LocalNetwork};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
    Closed,
}

struct ClientState {
    phase: Phase,
    remote: Option<Arc<LocalConnection>>,
    next_stream_id: u32,
}

pub(crate) struct LocalClientConnection {
    network: Arc<LocalNetwork>,
    jobs: JobQueue,
    listener: Weak<dyn ClientConnectionListener>,
    state: Mutex<ClientState>,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
    me: Weak<LocalClientConnection>,
}

/// Resolve `host` the way a socket connect would, without connecting
fn resolve(host: &str, port: u16) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    if host.eq_ignore_ascii_case("localhost") {
        return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    (host, port)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip())
}

fn call_failed(description: &str) -> Vec<AmfValue> {
    vec![
        AmfValue::Null,
        AmfValue::object([
            ("level", AmfValue::from(net_connection::call::FAILED.level.as_str())),
            ("code", AmfValue::from(net_connection::call::FAILED.code)),
            ("description", AmfValue::from(description)),
        ]),
    ]
}

impl LocalClientConnection {
    pub(crate) fn new(
        network: Arc<LocalNetwork>,
        jobs: JobQueue,
        listener: Weak<dyn ClientConnectionListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            network,
            jobs,
            listener,
            state: Mutex::new(ClientState {
                phase: Phase::Idle,
                remote: None,
                next_stream_id: 1,
            }),
            in_bytes: AtomicU64::new(0),
            out_bytes: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remote(&self) -> Option<Arc<LocalConnection>> {
        let state = self.lock();
        match state.phase {
            Phase::Connected => state.remote.clone(),
            _ => None,
        }
    }

    /// Runs on the engine queue
    fn dial(&self, port: u16, app: &str, local_ip: IpAddr) {
        if self.lock().phase != Phase::Connecting {
            return;
        }

        let Some(server) = self.network.lookup(port) else {
            tracing::debug!(port, "No server listening");
            self.peer_closed(ErrorCode::FailedToConnectSocket);
            return;
        };

        let peer_addr = SocketAddr::new(local_ip, self.network.ephemeral_port());
        match server.open(app, self.me.clone(), peer_addr) {
            Ok(connection) => {
                let mut state = self.lock();
                if state.phase == Phase::Connecting {
                    state.remote = Some(connection);
                    return;
                }
                drop(state);
                // Stopped while the server looked at the connection.
                connection.client_closed();
            }
            Err(code) => self.peer_closed(code),
        }
    }

    /// The server accepted the connection; runs on the engine queue
    pub(crate) fn accepted(&self) {
        {
            let mut state = self.lock();
            if state.phase != Phase::Connecting || state.remote.is_none() {
                return;
            }
            state.phase = Phase::Connected;
        }
        if let Some(listener) = self.listener.upgrade() {
            listener.on_connected();
        }
    }

    /// The connection ended for a reason other than our own `stop()`
    pub(crate) fn peer_closed(&self, code: ErrorCode) {
        {
            let mut state = self.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.remote = None;
        }
        tracing::debug!(error = %code, "Local connection closed");
        if let Some(listener) = self.listener.upgrade() {
            listener.on_disconnected(code);
        }
    }

    pub(crate) fn deliver_command(
        &self,
        stream_id: u32,
        name: &str,
        transaction_id: f64,
        params: Vec<AmfValue>,
    ) {
        if self.remote().is_none() {
            return;
        }
        self.in_bytes.fetch_add(name.len() as u64, Ordering::Relaxed);
        tracing::trace!(stream_id, command = name, transaction_id, "Delivering command");
        if let Some(listener) = self.listener.upgrade() {
            listener.on_command(stream_id, name, params);
        }
    }

    /// Queue a frame for the remote net-stream
    pub(crate) fn send_media(&self, stream_id: u32, frame: MediaFrame) {
        self.out_bytes
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        let me = self.me.clone();
        self.jobs.post(move || {
            if let Some(remote) = me.upgrade().and_then(|me| me.remote()) {
                remote.deliver_media(stream_id, &frame);
            }
        });
    }
}

impl ClientConnectionHandle for LocalClientConnection {
    fn connect(&self, server: &str, port: u16, app: &str) -> ErrorCode {
        {
            let mut state = self.lock();
            if state.phase != Phase::Idle {
                return ErrorCode::Generic;
            }
            let Some(ip) = resolve(server, port) else {
                return ErrorCode::FailedToResolveURL;
            };
            state.phase = Phase::Connecting;

            let me = self.me.clone();
            let app = app.to_string();
            self.jobs.post(move || {
                if let Some(me) = me.upgrade() {
                    me.dial(port, &app, ip);
                }
            });
        }
        ErrorCode::NoError
    }

    fn create_stream(&self, token: CompletionToken) {
        let me = self.me.clone();
        self.jobs.post(move || {
            let Some(me) = me.upgrade() else {
                return;
            };
            let Some(remote) = me.remote() else {
                token.reject(call_failed("not connected"));
                return;
            };

            let id = {
                let mut state = me.lock();
                let id = state.next_stream_id;
                state.next_stream_id += 1;
                id
            };
            if remote.create_stream(id) {
                token.resolve(vec![AmfValue::Null, AmfValue::from(id)]);
            } else {
                token.reject(call_failed("stream refused"));
            }
        });
    }

    fn publish(&self, stream_id: u32, name: &str) {
        let me = self.me.clone();
        let name = name.to_string();
        self.jobs.post(move || {
            if let Some(remote) = me.upgrade().and_then(|me| me.remote()) {
                remote.deliver_command(
                    stream_id,
                    "publish",
                    AmfValue::Null,
                    0.0,
                    vec![AmfValue::from(name), AmfValue::from("live")],
                );
            }
        });
    }

    fn delete_stream(&self, stream_id: u32, token: CompletionToken) {
        let me = self.me.clone();
        self.jobs.post(move || match me.upgrade().and_then(|me| me.remote()) {
            Some(remote) => {
                remote.delete_stream(stream_id);
                token.resolve(vec![AmfValue::Null]);
            }
            None => token.reject(call_failed("not connected")),
        });
    }

    fn create_outgoing_bridge(&self, stream_id: u32) -> Arc<dyn OutgoingBridgeHandle> {
        Arc::new(LocalOutgoingBridge::new(
            stream_id,
            self.me.clone(),
            self.jobs.clone(),
        ))
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
        }
    }

    fn stop(&self) {
        let remote = {
            let mut state = self.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.remote.take()
        };

        if let Some(remote) = remote {
            self.jobs.post(move || remote.client_closed());
        }
    }
}
