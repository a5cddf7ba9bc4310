//! Per-hub bookkeeping: connecting state, live sessions, stored configs,
//! attempt counters, in-flight locks, and reconnection chains.
//!
//! Everything lives in one [`Registry`] behind a synchronous mutex that is
//! never held across an `.await`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::endpoint::HubConnectionConfig;
use crate::session::HubSession;

use super::lock_layer::ConnectionLock;

/// Connecting state of one hub. A hub with no entry is `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HubState {
    #[default]
    Idle,
    /// The background supervisor owns the hub until it heals or gives up.
    Reconnecting,
    /// A caller-initiated connect is building a session.
    DirectConnecting,
}

impl HubState {
    /// `true` for `Reconnecting` and `DirectConnecting`.
    pub fn is_connecting(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// A registered session plus the id of the attempt that built it.
#[derive(Clone)]
pub(super) struct LiveSession {
    pub id: u64,
    pub session: Arc<dyn HubSession>,
}

impl LiveSession {
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}

/// Handle on a running reconnection supervisor.
#[derive(Debug, Clone)]
pub(super) struct ReconnectChain {
    pub id: u64,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub(super) struct Registry {
    pub sessions: HashMap<String, LiveSession>,
    pub configs: HashMap<String, HubConnectionConfig>,
    pub states: HashMap<String, HubState>,
    pub attempts: HashMap<String, u32>,
    pub locks: HashMap<String, ConnectionLock>,
    pub reconnects: HashMap<String, ReconnectChain>,
}

impl Registry {
    pub fn state(&self, hub: &str) -> HubState {
        self.states.get(hub).copied().unwrap_or_default()
    }

    /// Setting `Idle` removes the entry.
    pub fn set_state(&mut self, hub: &str, state: HubState) {
        if state == HubState::Idle {
            self.states.remove(hub);
        } else {
            self.states.insert(hub.to_string(), state);
        }
    }

    pub fn has_live_session(&self, hub: &str) -> bool {
        self.sessions.get(hub).is_some_and(LiveSession::is_connected)
    }

    /// State to fall back to after a failed attempt: `Reconnecting` while a
    /// supervisor is still alive for the hub, `Idle` otherwise.
    pub fn settle_after_failure(&mut self, hub: &str) {
        let next = if self.reconnects.contains_key(hub) {
            HubState::Reconnecting
        } else {
            HubState::Idle
        };
        self.set_state(hub, next);
    }

    /// End the reconnection chain `chain_id`, leaving newer chains alone.
    pub fn end_chain(&mut self, hub: &str, chain_id: u64) -> bool {
        if self.reconnects.get(hub).is_some_and(|chain| chain.id == chain_id) {
            self.reconnects.remove(hub);
            true
        } else {
            false
        }
    }

    /// Drop session, config, counter, state, and chain for `hub`.
    ///
    /// Locks are left alone: each in-flight attempt removes its own.
    pub fn forget(&mut self, hub: &str) -> (Option<LiveSession>, Option<ReconnectChain>) {
        let session = self.sessions.remove(hub);
        self.configs.remove(hub);
        self.attempts.remove(hub);
        self.states.remove(hub);
        (session, self.reconnects.remove(hub))
    }

    /// Every hub name with any state at all.
    pub fn known_hubs(&self) -> BTreeSet<String> {
        self.sessions
            .keys()
            .chain(self.configs.keys())
            .chain(self.locks.keys())
            .chain(self.reconnects.keys())
            .chain(self.states.keys())
            .cloned()
            .collect()
    }
}
