//! RTMP server
//!
//! Binds a port through the engine and routes inbound connections to the
//! registered applications by name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::engine::{ApplicationListener, Engine, ServerHandle};
use crate::error::{Error, Result};
use crate::event::ListenerId;

use super::application::{Application, ApplicationEvent};
use super::config::ServerConfig;

struct Registration {
    application: Arc<Application>,
    listener: ListenerId,
}

#[derive(Default)]
struct ServerState {
    applications: HashMap<String, Registration>,
    port: Option<u16>,
    stopped: bool,
}

pub struct Server {
    handle: Arc<dyn ServerHandle>,
    state: Mutex<ServerState>,
    me: Weak<Server>,
}

impl Server {
    pub fn new(engine: &dyn Engine) -> Arc<Self> {
        let handle = engine.create_server();
        Arc::new_cyclic(|me| Self {
            handle,
            state: Mutex::new(ServerState::default()),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start listening on `port`
    pub fn start(&self, port: u16) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped("server"));
        }

        self.handle.start(port)?;
        self.lock().port = Some(port);

        tracing::info!(port, "RTMP server listening");
        Ok(())
    }

    /// Start listening with the given configuration
    pub fn start_with(&self, config: &ServerConfig) -> Result<()> {
        self.start(config.port)
    }

    /// Port the server listens on, once started
    pub fn port(&self) -> Option<u16> {
        self.lock().port
    }

    /// Route connections for `name` to `application`, replacing any previous one
    ///
    /// The application is unregistered when it stops.
    pub fn add_application(&self, name: &str, application: &Arc<Application>) {
        if self.is_stopped() {
            return;
        }
        self.remove_application(name);

        let server = self.me.clone();
        let app_name = name.to_string();
        let registered = Arc::downgrade(application);
        let listener = application.events().on(move |event| {
            if matches!(event, ApplicationEvent::Stopped) {
                if let Some(server) = server.upgrade() {
                    server.on_application_stopped(&app_name, &registered);
                }
            }
        });

        let weak = Arc::downgrade(application);
        let weak: Weak<dyn ApplicationListener> = weak;
        self.handle.add_application(name, weak);
        self.lock().applications.insert(
            name.to_string(),
            Registration {
                application: application.clone(),
                listener,
            },
        );

        tracing::debug!(app = name, "Application registered");
    }

    /// Stop routing connections for `name`; the application keeps running
    pub fn remove_application(&self, name: &str) -> Option<Arc<Application>> {
        let registration = self.lock().applications.remove(name)?;
        registration.application.events().off(registration.listener);
        self.handle.remove_application(name);

        tracing::debug!(app = name, "Application unregistered");
        Some(registration.application)
    }

    fn on_application_stopped(&self, name: &str, application: &Weak<Application>) {
        let removed = {
            let mut state = self.lock();
            let matches = state
                .applications
                .get(name)
                .is_some_and(|r| std::ptr::eq(Arc::as_ptr(&r.application), application.as_ptr()));
            matches && state.applications.remove(name).is_some()
        };
        if removed {
            self.handle.remove_application(name);
        }
    }

    pub fn application(&self, name: &str) -> Option<Arc<Application>> {
        self.lock()
            .applications
            .get(name)
            .map(|r| r.application.clone())
    }

    /// Names of the registered applications
    pub fn application_names(&self) -> Vec<String> {
        self.lock().applications.keys().cloned().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Stop listening and stop every registered application
    pub fn stop(&self) {
        let registrations = {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.applications)
        };

        self.handle.stop();
        for (_, registration) in registrations {
            registration.application.events().off(registration.listener);
            registration.application.stop();
        }

        tracing::info!("RTMP server stopped");
    }
}
