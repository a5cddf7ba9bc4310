//! # Event Dispatcher
//!
//! Process-wide publish/subscribe registry for inbound hub messages, keyed by
//! the server method name. Listeners are independent of any hub's lifetime:
//! they survive disconnects and reconnections and are removed only through
//! [`EventDispatcher::off`].
//!
//! Two listener flavors share one ordered list per method:
//!
//! - **Callbacks** registered with [`on`](EventDispatcher::on)
//! - **Channels** created with [`subscribe`](EventDispatcher::subscribe)
//!
//! Dispatch follows registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

/// Channel buffer size for channel subscriptions.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Listener callback invoked with the message payload.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
enum Listener {
    Callback(EventCallback),
    Channel(mpsc::Sender<Value>),
}

type ListenerMap = HashMap<String, Vec<(ListenerId, Listener)>>;

/// Fan-out registry from method names to listeners. Cheap to clone; clones
/// share the same registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<Mutex<ListenerMap>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<String> = self
            .listeners
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("EventDispatcher")
            .field("methods", &methods)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `method`.
    pub fn on<F>(&self, method: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(method, Listener::Callback(Arc::new(callback)))
    }

    /// Register a channel listener for `method`.
    ///
    /// Messages are delivered with `try_send`; when the receiver falls
    /// behind by more than the buffer, newer messages are dropped. A dropped
    /// receiver is pruned on the next dispatch.
    pub fn subscribe(&self, method: &str) -> (ListenerId, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (self.register(method, Listener::Channel(tx)), rx)
    }

    /// Remove one listener. Returns `false` if it was not registered.
    pub fn off(&self, method: &str, id: ListenerId) -> bool {
        let Ok(mut map) = self.listeners.lock() else {
            return false;
        };
        let Some(entries) = map.get_mut(method) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            map.remove(method);
        }
        removed
    }

    /// Number of listeners registered for `method`.
    pub fn listener_count(&self, method: &str) -> usize {
        self.listeners
            .lock()
            .map(|map| map.get(method).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Deliver `data` to every listener of `method`, in registration order.
    ///
    /// Callbacks run outside the registry lock, so a callback may register
    /// or remove listeners. Returns the number of listeners reached.
    pub(crate) fn emit(&self, method: &str, data: &Value) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = match self.listeners.lock() {
            Ok(map) => map.get(method).cloned().unwrap_or_default(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, listener) in snapshot {
            match listener {
                Listener::Callback(callback) => {
                    callback(data);
                    delivered += 1;
                }
                Listener::Channel(tx) => match tx.try_send(data.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(method, "Subscriber channel full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                },
            }
        }

        for id in closed {
            self.off(method, id);
        }
        delivered
    }

    fn register(&self, method: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut map) = self.listeners.lock() {
            map.entry(method.to_string())
                .or_default()
                .push((id, listener));
        }
        id
    }
}
