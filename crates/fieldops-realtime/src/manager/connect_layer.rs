use std::sync::Arc;

use futures_util::future::join_all;

use crate::endpoint::HubConnectionConfig;
use crate::error::{HubError, HubResult};
use crate::session::{CloseCallback, HubSession, SessionHandlers, SessionRequest};

use super::state::LiveSession;
use super::{HubEvent, HubManager, HubState};

impl HubManager {
    /// Build, start, and register a session. Runs only under the hub's
    /// connection lock; `attempt_id` becomes the session id.
    pub(super) async fn connect_internal(
        &self,
        config: HubConnectionConfig,
        attempt_id: u64,
    ) -> HubResult<()> {
        let hub = config.name.as_str();

        if self.is_connected(hub) {
            tracing::info!(hub, "Already connected to hub");
            return Ok(());
        }

        match self.state(hub) {
            HubState::DirectConnecting => {
                tracing::info!(
                    hub,
                    "Hub already direct-connecting, skipping duplicate attempt"
                );
                return Ok(());
            }
            HubState::Reconnecting => {
                tracing::info!(
                    hub,
                    "Hub is reconnecting, proceeding with direct connection attempt"
                );
            }
            HubState::Idle => {}
        }

        self.set_state(hub, HubState::DirectConnecting);

        let session = match self.build_session(&config, attempt_id).await {
            Ok(session) => session,
            Err(e) => {
                self.registry().settle_after_failure(hub);
                tracing::error!(hub, error = %e, "Failed to connect to hub");
                return Err(e);
            }
        };

        let registered = {
            let mut registry = self.registry();
            // Checked under the registry lock: a session that died before
            // this point has already reported its close, or will find it
            // unregistered.
            if session.is_connected() {
                registry.sessions.insert(
                    config.name.clone(),
                    LiveSession {
                        id: attempt_id,
                        session: Arc::clone(&session),
                    },
                );
                registry.attempts.insert(config.name.clone(), 0);
                registry.set_state(hub, HubState::Idle);
                registry.configs.insert(config.name.clone(), config.clone());
                true
            } else {
                registry.settle_after_failure(hub);
                false
            }
        };

        if !registered {
            session.stop().await;
            let err = HubError::ConnectFailed {
                hub: hub.to_string(),
                reason: "session closed while starting".into(),
            };
            tracing::error!(hub, error = %err, "Failed to connect to hub");
            return Err(err);
        }

        tracing::info!(hub, methods = ?config.methods, "Connected to hub");
        self.emit(HubEvent::Connected {
            hub: hub.to_string(),
        });
        Ok(())
    }

    async fn build_session(
        &self,
        config: &HubConnectionConfig,
        attempt_id: u64,
    ) -> HubResult<Arc<dyn HubSession>> {
        let hub = config.name.as_str();
        let token = self.inner.tokens.access_token().ok_or(HubError::NoAuthToken)?;
        let target = config.resolve_target(&token, &self.inner.config.geolocation_hub_name)?;

        tracing::info!(
            hub,
            url = %target.redacted_url(),
            query_token = target.bearer_token.is_none(),
            "Connecting to hub"
        );
        for method in &config.methods {
            tracing::debug!(hub, method, "Registering hub method");
        }

        let handlers = SessionHandlers::new(
            &config.methods,
            self.inner.dispatcher.clone(),
            self.close_callback(hub, attempt_id),
        );
        let request = SessionRequest {
            hub: hub.to_string(),
            target,
            methods: config.methods.clone(),
        };

        let budget = self.inner.config.timeouts.connect_timeout()
            + self.inner.config.timeouts.handshake_timeout();
        tokio::time::timeout(budget, self.inner.connector.connect(request, handlers))
            .await
            .map_err(|_| HubError::Timeout {
                seconds: budget.as_secs(),
            })?
    }

    /// Close hook for the session built by attempt `session_id`.
    ///
    /// Holds only a weak reference so sessions do not keep the manager alive.
    fn close_callback(&self, hub: &str, session_id: u64) -> CloseCallback {
        let weak = Arc::downgrade(&self.inner);
        let hub = hub.to_string();
        Arc::new(move |error| {
            if let Some(inner) = weak.upgrade() {
                HubManager { inner }.handle_unexpected_close(&hub, session_id, error);
            }
        })
    }

    /// Disconnect from a hub and forget it.
    ///
    /// Waits for any in-flight connect attempt, stops the session, and
    /// removes config, attempt counter, state, and any pending reconnection
    /// so that no scheduled retry brings the hub back.
    pub async fn disconnect(&self, hub: &str) {
        if let Some(pending) = self.pending_lock(hub) {
            tracing::info!(hub, "Waiting for ongoing connection before disconnecting");
            if let Err(e) = pending.attempt.await {
                tracing::debug!(hub, error = %e, "Connection attempt failed while waiting to disconnect");
            }
        }

        let (session, chain) = self.registry().forget(hub);
        if let Some(chain) = chain {
            chain.cancel.cancel();
            tracing::debug!(hub, "Cancelled pending reconnection");
        }

        if let Some(live) = session {
            live.session.stop().await;
            tracing::info!(hub, "Disconnected from hub");
            self.emit(HubEvent::Disconnected {
                hub: hub.to_string(),
                reason: "disconnect requested".into(),
            });
        }
    }

    /// Disconnect every known hub concurrently and wait for all of them.
    pub async fn disconnect_all(&self) {
        let hubs = self.registry().known_hubs();
        join_all(hubs.iter().map(|hub| self.disconnect(hub))).await;
    }

    /// Tear down all hubs. Listeners stay registered.
    pub async fn dispose(&self) {
        tracing::debug!("Disposing hub manager");
        self.disconnect_all().await;
    }
}
