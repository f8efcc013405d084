//! RTMP application
//!
//! The point where inbound connections for one application name reach user
//! code. Every connection becomes a [`Client`] announced with
//! [`ApplicationEvent::Connect`]; it is up to the listener to accept or reject
//! it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::engine::{ApplicationListener, ConnectionHandle};
use crate::event::Emitter;

use super::client::{Client, ClientEvent};

/// Events raised by an [`Application`]
#[derive(Clone)]
pub enum ApplicationEvent {
    Connect(Arc<Client>),
    Stopped,
}

impl std::fmt::Debug for ApplicationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationEvent::Connect(client) => {
                f.debug_tuple("Connect").field(&client.id()).finish()
            }
            ApplicationEvent::Stopped => f.write_str("Stopped"),
        }
    }
}

#[derive(Default)]
struct ApplicationState {
    clients: HashMap<Uuid, Arc<Client>>,
    stopped: bool,
}

pub struct Application {
    runtime: Handle,
    state: Mutex<ApplicationState>,
    events: Emitter<ApplicationEvent>,
    me: Weak<Application>,
}

impl Application {
    /// Create an application bound to the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new() -> Arc<Self> {
        Self::with_runtime(Handle::current())
    }

    /// Create an application whose streams dispatch commands on `runtime`
    pub fn with_runtime(runtime: Handle) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            runtime,
            state: Mutex::new(ApplicationState::default()),
            events: Emitter::new(),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ApplicationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> &Emitter<ApplicationEvent> {
        &self.events
    }

    pub fn client(&self, id: Uuid) -> Option<Arc<Client>> {
        self.lock().clients.get(&id).cloned()
    }

    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.lock().clients.values().cloned().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Stop every client; later connections are rejected
    pub fn stop(&self) {
        let clients = {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.clients)
        };

        for client in clients.into_values() {
            client.stop();
        }

        tracing::debug!("Application stopped");
        self.events.emit(ApplicationEvent::Stopped);
        self.events.close();
    }
}

impl ApplicationListener for Application {
    fn on_connect(&self, app_name: &str, connection: Arc<dyn ConnectionHandle>) {
        if self.is_stopped() {
            connection.reject();
            return;
        }

        let client = Client::new(connection, app_name, self.runtime.clone());
        tracing::info!(
            client_id = %client.id(),
            app = app_name,
            peer = %client.peer_addr(),
            "New connection"
        );

        let app = self.me.clone();
        let id = client.id();
        client.events().on(move |event| {
            if matches!(event, ClientEvent::Stopped) {
                if let Some(app) = app.upgrade() {
                    app.lock().clients.remove(&id);
                }
            }
        });

        self.lock().clients.insert(id, client.clone());
        self.events.emit(ApplicationEvent::Connect(client));
    }
}
