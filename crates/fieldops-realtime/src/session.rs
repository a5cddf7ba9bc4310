//! # Transport Session seam
//!
//! The manager never talks to a socket directly. It asks a
//! [`SessionConnector`] to build a [`HubSession`] for a resolved
//! [`SessionRequest`] and hands it a [`SessionHandlers`] bundle that routes
//! inbound messages into the [`EventDispatcher`](crate::EventDispatcher) and
//! reports unexpected closes back to the manager.
//!
//! [`SignalRConnector`](crate::client::SignalRConnector) is the production
//! implementation; tests plug in scripted connectors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::endpoint::ConnectTarget;
use crate::error::{HubError, HubResult};
use crate::events::EventDispatcher;

/// Callback fired when a live session closes without being stopped locally.
pub type CloseCallback = Arc<dyn Fn(Option<HubError>) + Send + Sync>;

/// Parameters for building one transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub hub: String,
    pub target: ConnectTarget,
    /// Server-to-client methods to forward.
    pub methods: Vec<String>,
}

/// A live, started connection to one hub.
#[async_trait]
pub trait HubSession: Send + Sync {
    /// Whether the session can still carry invocations.
    fn is_connected(&self) -> bool;

    /// Call a hub method and wait for its completion.
    ///
    /// `Value::Null` is returned for methods without a result.
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> HubResult<Value>;

    /// Close the session. Does not fire the close callback.
    async fn stop(&self);
}

/// Factory for transport sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Build and start a session. Only returns once the session is usable.
    async fn connect(
        &self,
        request: SessionRequest,
        handlers: SessionHandlers,
    ) -> HubResult<Arc<dyn HubSession>>;
}

/// Inbound wiring for a session: method forwarding and close reporting.
#[derive(Clone)]
pub struct SessionHandlers {
    methods: Arc<[String]>,
    dispatcher: EventDispatcher,
    on_close: CloseCallback,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("methods", &self.methods)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionHandlers {
    pub fn new(methods: &[String], dispatcher: EventDispatcher, on_close: CloseCallback) -> Self {
        Self {
            methods: methods.into(),
            dispatcher,
            on_close,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handlers that only forward messages; closes are ignored.
    pub fn detached(methods: &[String], dispatcher: EventDispatcher) -> Self {
        Self::new(methods, dispatcher, Arc::new(|_| {}))
    }

    /// Whether inbound calls to `method` are forwarded.
    pub fn is_subscribed(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Forward an inbound invocation to the dispatcher.
    ///
    /// The payload is the first argument, or `Null` when there is none.
    /// Returns `false` when `method` is not subscribed.
    pub fn deliver(&self, method: &str, arguments: Vec<Value>) -> bool {
        if !self.is_subscribed(method) {
            tracing::trace!(method, "Ignoring unsubscribed hub method");
            return false;
        }
        let payload = arguments.into_iter().next().unwrap_or(Value::Null);
        self.dispatcher.emit(method, &payload);
        true
    }

    /// Report that the session closed. Only the first call has an effect.
    pub fn closed(&self, error: Option<HubError>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        (self.on_close)(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn methods(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_deliver_forwards_first_argument() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            dispatcher.on("newCall", move |data| seen.lock().unwrap().push(data.clone()));
        }

        let handlers = SessionHandlers::detached(&methods(&["newCall"]), dispatcher);
        assert!(handlers.deliver("newCall", vec![json!({"id": 1}), json!("extra")]));
        assert!(handlers.deliver("newCall", vec![]));
        assert!(!handlers.deliver("callEnded", vec![json!(1)]));

        assert_eq!(*seen.lock().unwrap(), vec![json!({"id": 1}), Value::Null]);
    }

    #[test]
    fn test_close_fires_once() {
        let count = Arc::new(Mutex::new(Vec::new()));
        let handlers = {
            let count = Arc::clone(&count);
            SessionHandlers::new(
                &[],
                EventDispatcher::new(),
                Arc::new(move |err| count.lock().unwrap().push(err)),
            )
        };

        let clone = handlers.clone();
        handlers.closed(Some(HubError::ConnectionLost {
            reason: "reset".into(),
        }));
        clone.closed(None);

        assert_eq!(count.lock().unwrap().len(), 1);
    }
}
