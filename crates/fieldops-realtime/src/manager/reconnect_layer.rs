use tokio_util::sync::CancellationToken;

use crate::error::HubError;

use super::state::ReconnectChain;
use super::{HubEvent, HubManager, HubState};

/// How one scheduled reconnection attempt ended.
enum AttemptOutcome {
    /// Session rebuilt by this attempt.
    Reconnected,
    /// Nothing left to do: config removed or another path reconnected.
    Stood,
    Failed(HubError),
}

impl HubManager {
    /// Close hook target. Ignores closes of sessions that are no longer
    /// registered (stale sessions, or ones replaced since).
    pub(super) fn handle_unexpected_close(
        &self,
        hub: &str,
        session_id: u64,
        error: Option<HubError>,
    ) {
        let reason = error.map_or_else(|| "connection closed".to_string(), |e| e.to_string());

        let chain = {
            let mut registry = self.registry();
            if !registry
                .sessions
                .get(hub)
                .is_some_and(|live| live.id == session_id)
            {
                tracing::debug!(hub, session_id, "Ignoring close of stale session");
                return;
            }
            registry.sessions.remove(hub);

            if self.inner.config.reconnect.enabled {
                registry.set_state(hub, HubState::Reconnecting);
                registry.attempts.insert(hub.to_string(), 0);

                let chain = ReconnectChain {
                    id: self.next_id(),
                    cancel: CancellationToken::new(),
                };
                if let Some(previous) = registry.reconnects.insert(hub.to_string(), chain.clone()) {
                    previous.cancel.cancel();
                }
                Some(chain)
            } else {
                let (_, previous) = registry.forget(hub);
                if let Some(previous) = previous {
                    previous.cancel.cancel();
                }
                None
            }
        };

        tracing::warn!(hub, reason = %reason, "Hub connection closed unexpectedly");
        self.emit(HubEvent::Disconnected {
            hub: hub.to_string(),
            reason,
        });

        match chain {
            Some(chain) => {
                let this = self.clone();
                let hub = hub.to_string();
                tokio::spawn(async move { this.run_reconnect(hub, chain).await });
            }
            None => tracing::info!(hub, "Reconnection disabled, hub forgotten"),
        }
    }

    /// Supervisor loop for one reconnection chain.
    async fn run_reconnect(&self, hub_name: String, chain: ReconnectChain) {
        let hub = hub_name.as_str();
        let max_attempts = self.inner.config.reconnect.max_attempts;

        for attempt in 0..max_attempts {
            let current = attempt + 1;
            let delay = self.inner.backoff.delay_for_attempt(attempt);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

            self.registry().attempts.insert(hub_name.clone(), current);
            tracing::info!(
                hub,
                attempt = current,
                max_attempts,
                delay_ms,
                "Scheduling reconnection attempt"
            );
            self.emit(HubEvent::Reconnecting {
                hub: hub_name.clone(),
                attempt: current,
                delay_ms,
            });

            tokio::select! {
                () = chain.cancel.cancelled() => {
                    tracing::debug!(hub, "Reconnection cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            match self.attempt_reconnect(hub, &chain, current).await {
                AttemptOutcome::Reconnected => {
                    tracing::info!(hub, attempts = current, "Reconnected to hub");
                    self.emit(HubEvent::Reconnected {
                        hub: hub_name.clone(),
                        attempts: current,
                    });
                    return;
                }
                AttemptOutcome::Stood => return,
                AttemptOutcome::Failed(e) => {
                    if chain.cancel.is_cancelled() {
                        tracing::debug!(hub, "Reconnection cancelled");
                        return;
                    }
                    tracing::error!(
                        hub,
                        attempt = current,
                        max_attempts,
                        error = %e,
                        "Reconnection attempt failed"
                    );
                }
            }
        }

        self.give_up(hub, &chain, max_attempts);
    }

    async fn attempt_reconnect(
        &self,
        hub: &str,
        chain: &ReconnectChain,
        attempt: u32,
    ) -> AttemptOutcome {
        let config = {
            let mut registry = self.registry();
            let Some(config) = registry.configs.get(hub).cloned() else {
                tracing::debug!(hub, "Hub config was removed, skipping reconnection");
                if registry.end_chain(hub, chain.id) {
                    registry.attempts.remove(hub);
                    registry.set_state(hub, HubState::Idle);
                }
                return AttemptOutcome::Stood;
            };

            if registry.has_live_session(hub) {
                tracing::debug!(hub, "Hub already connected, skipping reconnection");
                if registry.end_chain(hub, chain.id) {
                    registry.attempts.remove(hub);
                    registry.set_state(hub, HubState::Idle);
                }
                return AttemptOutcome::Stood;
            }

            registry.set_state(hub, HubState::Reconnecting);
            registry.sessions.remove(hub);
            config
        };

        tracing::info!(hub, attempt, "Refreshing access token before reconnecting");
        if let Err(e) = self.inner.tokens.refresh_token().await {
            self.registry().settle_after_failure(hub);
            return AttemptOutcome::Failed(match e {
                e @ HubError::TokenRefreshFailed { .. } => e,
                other => HubError::TokenRefreshFailed {
                    reason: other.to_string(),
                },
            });
        }
        if self.inner.tokens.access_token().is_none() {
            self.registry().settle_after_failure(hub);
            return AttemptOutcome::Failed(HubError::NoAuthToken);
        }

        match self.connect_guarded(config, Some(&chain.cancel)).await {
            Ok(()) => {
                let mut registry = self.registry();
                if registry.end_chain(hub, chain.id) {
                    registry.attempts.remove(hub);
                    registry.set_state(hub, HubState::Idle);
                }
                AttemptOutcome::Reconnected
            }
            Err(e) => {
                self.registry().settle_after_failure(hub);
                AttemptOutcome::Failed(e)
            }
        }
    }

    /// Terminal path after the last failed attempt: forget the hub.
    fn give_up(&self, hub: &str, chain: &ReconnectChain, attempts: u32) {
        let stale = {
            let mut registry = self.registry();
            if !registry.end_chain(hub, chain.id) {
                return;
            }
            let (session, _) = registry.forget(hub);
            session
        };

        let err = HubError::MaxReconnectAttemptsExhausted {
            hub: hub.to_string(),
            attempts,
        };
        tracing::error!(hub, attempts, error = %err, "Giving up on hub");
        self.emit(HubEvent::ReconnectFailed {
            hub: hub.to_string(),
            attempts,
        });

        if let Some(live) = stale {
            tokio::spawn(async move { live.session.stop().await });
        }
    }
}
