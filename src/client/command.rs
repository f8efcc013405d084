//! Outbound command correlation
//!
//! Every createStream/deleteStream sent to the engine is registered in a
//! [`PendingRequests`] table under a monotonically increasing id. The engine
//! answers through the [`CompletionToken`] it was handed, the caller awaits the
//! matching [`PendingCommand`]. An entry is removed on the first answer, so a
//! request resolves exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::amf::AmfValue;
use crate::error::{CommandError, Error, Result};

type Reply = Result<Vec<AmfValue>>;

#[derive(Default)]
struct PendingTable {
    next_id: u64,
    entries: HashMap<u64, oneshot::Sender<Reply>>,
}

fn lock(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

/// Table of commands waiting for a reply from the peer
#[derive(Default)]
pub struct PendingRequests {
    table: Arc<Mutex<PendingTable>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request for `command`
    ///
    /// The token goes to the engine, the future stays with the caller.
    pub fn register(&self, command: &str) -> (CompletionToken, PendingCommand) {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = lock(&self.table);
            table.next_id += 1;
            let id = table.next_id;
            table.entries.insert(id, tx);
            id
        };

        tracing::trace!(request_id = id, command, "Registered pending command");

        let token = CompletionToken {
            id,
            command: command.to_string(),
            table: Arc::downgrade(&self.table),
            answered: false,
        };
        let pending = PendingCommand {
            id,
            command: command.to_string(),
            rx,
        };
        (token, pending)
    }

    /// Number of requests still waiting for an answer
    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The engine side of a pending request
///
/// Consumed by [`resolve`](CompletionToken::resolve) or
/// [`reject`](CompletionToken::reject). A token dropped without an answer
/// rejects its request with [`Error::Abandoned`].
pub struct CompletionToken {
    id: u64,
    command: String,
    table: Weak<Mutex<PendingTable>>,
    answered: bool,
}

impl CompletionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Complete the request with the peer's `_result` payload
    pub fn resolve(mut self, value: Vec<AmfValue>) {
        self.complete(Ok(value));
    }

    /// Fail the request with the peer's `_error` payload
    pub fn reject(mut self, value: Vec<AmfValue>) {
        let error = CommandError::new(self.command.clone(), value);
        self.complete(Err(error.into()));
    }

    fn complete(&mut self, reply: Reply) {
        self.answered = true;

        let Some(table) = self.table.upgrade() else {
            return;
        };
        let sender = lock(&table).entries.remove(&self.id);
        match sender {
            Some(tx) => {
                // The caller may have stopped waiting.
                let _ = tx.send(reply);
            }
            None => {
                tracing::debug!(request_id = self.id, command = %self.command, "Late command completion ignored");
            }
        }
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        if !self.answered {
            let command = self.command.clone();
            self.complete(Err(Error::Abandoned(command)));
        }
    }
}

impl std::fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionToken")
            .field("id", &self.id)
            .field("command", &self.command)
            .finish()
    }
}

/// Future resolving to the peer's reply to a command
#[must_use = "a pending command does nothing unless awaited"]
pub struct PendingCommand {
    id: u64,
    command: String,
    rx: oneshot::Receiver<Reply>,
}

impl PendingCommand {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingCommand {
    type Output = Result<Vec<AmfValue>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned(self.command.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
