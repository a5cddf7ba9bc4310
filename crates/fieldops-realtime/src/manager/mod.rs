//! # Hub Manager
//!
//! One coordinator shared by every collaborator in the process. It owns the
//! transport sessions of all hubs and adds on top of them:
//!
//! - **Serialized connects**: at most one session build per hub name in
//!   flight; late callers join the running attempt
//! - **Automatic reconnection** with capped exponential backoff, jitter,
//!   and a token refresh before every attempt
//! - **Typed invocations** that fail fast while a hub is down
//! - **Event dispatch** of inbound pushes to process-wide listeners
//! - **Lifecycle events** on a broadcast channel
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fieldops_realtime::{
//!     HubConnectionConfig, HubManager, HubManagerConfig, StaticTokenProvider,
//! };
//!
//! # async fn demo() -> fieldops_realtime::HubResult<()> {
//! let tokens = Arc::new(StaticTokenProvider::new("access-token"));
//! let manager = HubManager::new(HubManagerConfig::discover(None)?, tokens);
//!
//! manager.on("newCall", |call| println!("dispatch: {call}"));
//! manager
//!     .connect(
//!         HubConnectionConfig::eventing("alerts", "https://events.example/hubs/", "alertsHub")
//!             .with_methods(["newCall"]),
//!     )
//!     .await?;
//!
//! let ack: bool = manager
//!     .invoke("alerts", "AcknowledgeCall", &serde_json::json!({"callId": 42}))
//!     .await?;
//! # let _ = ack;
//! manager.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reconnection Behavior
//!
//! When a live session closes without being stopped locally, the manager:
//! 1. Marks the hub `Reconnecting`, drops the dead session, resets the
//!    attempt counter, and emits [`HubEvent::Disconnected`]
//! 2. Emits [`HubEvent::Reconnecting`] and waits out the backoff delay
//! 3. Refreshes the access token, then rebuilds the session from the stored
//!    config through the same serialized connect path
//! 4. On success: clears the counter and emits [`HubEvent::Reconnected`]
//! 5. After the last failed attempt: forgets the hub entirely and emits
//!    [`HubEvent::ReconnectFailed`]
//!
//! An explicit [`disconnect`](HubManager::disconnect) cancels a pending
//! supervisor; it never resurrects the hub.
//!
//! **Listeners are not tied to sessions.** Callbacks registered with
//! [`on`](HubManager::on) keep receiving pushes after a reconnection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::auth::TokenProvider;
use crate::client::SignalRConnector;
use crate::config::HubManagerConfig;
use crate::endpoint::HubConnectionConfig;
use crate::events::{EventDispatcher, ListenerId};
use crate::retry::ReconnectBackoff;
use crate::session::SessionConnector;

mod connect_layer;
mod invoke_layer;
mod lock_layer;
mod reconnect_layer;
mod state;

pub use state::HubState;

use state::Registry;

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Hub lifecycle events emitted by [`HubManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A session was built and registered.
    Connected { hub: String },

    /// A session went away, locally or unexpectedly.
    Disconnected { hub: String, reason: String },

    /// A reconnection attempt is scheduled (1-based attempt number).
    Reconnecting {
        hub: String,
        attempt: u32,
        delay_ms: u64,
    },

    /// The supervisor rebuilt the session.
    Reconnected { hub: String, attempts: u32 },

    /// All reconnection attempts failed; the hub was forgotten.
    ReconnectFailed { hub: String, attempts: u32 },
}

pub(crate) struct Inner {
    config: HubManagerConfig,
    backoff: ReconnectBackoff,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn SessionConnector>,
    dispatcher: EventDispatcher,
    registry: Mutex<Registry>,
    event_tx: broadcast::Sender<HubEvent>,
    next_id: AtomicU64,
}

/// Process-wide hub connection coordinator.
///
/// Cheap to clone: clones share the same hubs, listeners, and event
/// channel. Construct one at startup and hand clones to collaborators.
///
/// See [module docs](self) for usage examples.
#[derive(Clone)]
pub struct HubManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HubManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubManager")
            .field("hubs", &self.registry().known_hubs())
            .finish_non_exhaustive()
    }
}

impl HubManager {
    /// Manager using the SignalR WebSocket transport.
    pub fn new(config: HubManagerConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let connector = SignalRConnector::new(config.timeouts.clone(), config.keep_alive.clone());
        Self::with_connector(config, tokens, Arc::new(connector))
    }

    /// Manager using a custom transport.
    pub fn with_connector(
        config: HubManagerConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Hub manager config out of range, clamping");
        }
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backoff = ReconnectBackoff::from(&config.reconnect);
        Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                tokens,
                connector,
                dispatcher: EventDispatcher::new(),
                registry: Mutex::new(Registry::default()),
                event_tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &HubManagerConfig {
        &self.inner.config
    }

    /// Subscribe to hub lifecycle events.
    pub fn event_receiver(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.event_tx.subscribe()
    }

    // ─── Event dispatcher ───────────────────────────────────────────────

    /// The shared listener registry.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Register a listener for inbound pushes of `method` on any hub.
    pub fn on<F>(&self, method: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(method, callback)
    }

    /// Remove a listener registered with [`on`](Self::on).
    pub fn off(&self, method: &str, id: ListenerId) -> bool {
        self.inner.dispatcher.off(method, id)
    }

    // ─── State tracker ──────────────────────────────────────────────────

    pub fn state(&self, hub: &str) -> HubState {
        self.registry().state(hub)
    }

    pub(crate) fn set_state(&self, hub: &str, state: HubState) {
        tracing::debug!(hub, ?state, "Hub state change");
        self.registry().set_state(hub, state);
    }

    /// `true` while the hub is reconnecting or being connected directly.
    pub fn is_connecting(&self, hub: &str) -> bool {
        self.state(hub).is_connecting()
    }

    /// `true` if the hub has a session or is connecting.
    pub fn is_available(&self, hub: &str) -> bool {
        let registry = self.registry();
        registry.sessions.contains_key(hub) || registry.state(hub).is_connecting()
    }

    /// `true` if the hub has a live, connected session.
    pub fn is_connected(&self, hub: &str) -> bool {
        self.registry().has_live_session(hub)
    }

    /// Current reconnection attempt counter, `None` when absent.
    pub fn reconnect_attempts(&self, hub: &str) -> Option<u32> {
        self.registry().attempts.get(hub).copied()
    }

    /// Stored connection config for `hub`.
    pub fn hub_config(&self, hub: &str) -> Option<HubConnectionConfig> {
        self.registry().configs.get(hub).cloned()
    }

    /// Names of hubs with a registered session, sorted.
    pub fn connected_hubs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().sessions.keys().cloned().collect();
        names.sort();
        names
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: HubEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}
