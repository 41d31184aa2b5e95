//! Per-connection event handler table and pending invocation map.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use cowork_protocol::Message;

use crate::error::ClientError;
use crate::types::EventHandler;

/// Event handlers keyed by lowercase event name.
///
/// Handlers survive automatic reconnects because the table belongs to the
/// client, not to a session.
#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl HandlerTable {
    pub(crate) fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_lowercase())
            .or_default()
            .push(handler);
    }

    pub(crate) fn off(&self, event: &str) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event.to_lowercase());
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.to_lowercase())
            .map_or(0, Vec::len)
    }

    /// Calls every handler for `target` in registration order.
    ///
    /// Returns the number of handlers invoked. Handlers run outside the lock
    /// so they may register or remove handlers themselves.
    pub(crate) fn dispatch(&self, target: &str, args: &[Value]) -> usize {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target.to_lowercase())
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(target, "no handler registered for server invocation");
            return 0;
        }
        trace!(target, handlers = handlers.len(), "dispatching server invocation");
        for handler in &handlers {
            handler(args);
        }
        handlers.len()
    }
}

type Completion = oneshot::Sender<Result<Value, ClientError>>;

/// Invocations waiting for their completion message.
#[derive(Default)]
pub(crate) struct PendingInvocations {
    waiting: Mutex<HashMap<String, Completion>>,
}

impl PendingInvocations {
    fn waiting(&self) -> std::sync::MutexGuard<'_, HashMap<String, Completion>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, id: &str) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.waiting().insert(id.to_string(), tx);
        rx
    }

    pub(crate) fn remove(&self, id: &str) {
        self.waiting().remove(id);
    }

    /// Resolves the invocation named by a completion message.
    ///
    /// Returns `false` if nothing was waiting for it.
    pub(crate) fn complete(&self, msg: &Message) -> bool {
        let Some(id) = msg.invocation_id.as_deref() else {
            return false;
        };
        let Some(tx) = self.waiting().remove(id) else {
            debug!(invocation_id = id, "completion for unknown invocation");
            return false;
        };

        let outcome = match &msg.error {
            Some(error) => Err(ClientError::Server(error.clone())),
            None => Ok(msg.result.clone().unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
        true
    }

    /// Fails every waiting invocation.
    pub(crate) fn fail_all(&self, reason: impl Fn() -> ClientError) {
        let drained: Vec<Completion> = self.waiting().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending invocations");
        }
        for tx in drained {
            let _ = tx.send(Err(reason()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting().len()
    }
}
