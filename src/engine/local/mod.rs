//! In-process media engine
//!
//! Implements every engine trait without a wire format: servers and client
//! connections created from the same [`LocalEngine`] (or its clones) talk
//! through a private address space keyed by port. All callbacks into the
//! control plane run on one sequential job queue, the engine thread.

mod client;
mod media;
mod server;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::engine::{ClientConnectionHandle, ClientConnectionListener, Engine, ServerHandle};

use self::client::LocalClientConnection;
use self::server::LocalServer;

type Job = Box<dyn FnOnce() + Send>;

/// Sequential queue standing in for the engine thread
#[derive(Clone)]
pub(crate) struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub(crate) fn spawn(runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }

    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::debug!("Engine queue closed, job dropped");
        }
    }
}

/// Ports bound by local servers
#[derive(Default)]
pub(crate) struct LocalNetwork {
    servers: Mutex<HashMap<u16, Weak<LocalServer>>>,
    next_ephemeral: AtomicU16,
}

impl LocalNetwork {
    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Weak<LocalServer>>> {
        self.servers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn bind(&self, port: u16, server: Weak<LocalServer>) -> io::Result<()> {
        let mut servers = self.lock();
        if servers.get(&port).is_some_and(|s| s.strong_count() > 0) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("port {port} already in use"),
            ));
        }
        servers.insert(port, server);
        Ok(())
    }

    pub(crate) fn unbind(&self, port: u16) {
        self.lock().remove(&port);
    }

    pub(crate) fn lookup(&self, port: u16) -> Option<Arc<LocalServer>> {
        self.lock().get(&port).and_then(Weak::upgrade)
    }

    /// Client side port of a new connection
    pub(crate) fn ephemeral_port(&self) -> u16 {
        49152 + self.next_ephemeral.fetch_add(1, Ordering::Relaxed) % 16384
    }
}

/// Engine whose servers and clients live in this process
#[derive(Clone)]
pub struct LocalEngine {
    network: Arc<LocalNetwork>,
    jobs: JobQueue,
}

impl LocalEngine {
    /// Create an engine with its own network, running on the current runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new() -> Self {
        Self::with_runtime(&Handle::current())
    }

    pub fn with_runtime(runtime: &Handle) -> Self {
        Self {
            network: Arc::new(LocalNetwork::default()),
            jobs: JobQueue::spawn(runtime),
        }
    }
}

impl Engine for LocalEngine {
    fn create_server(&self) -> Arc<dyn ServerHandle> {
        LocalServer::new(self.network.clone(), self.jobs.clone())
    }

    fn create_client_connection(
        &self,
        listener: Weak<dyn ClientConnectionListener>,
    ) -> Arc<dyn ClientConnectionHandle> {
        LocalClientConnection::new(self.network.clone(), self.jobs.clone(), listener)
    }
}
