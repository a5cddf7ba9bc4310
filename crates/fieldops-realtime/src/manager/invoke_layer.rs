use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{HubError, HubResult};

use super::{HubManager, HubState};

impl HubManager {
    /// Call `method` on a hub with a single payload argument and decode the
    /// result into `R`.
    ///
    /// Waits for a connect attempt in flight for the hub first. No retry is
    /// performed; see [`with_retry`](crate::retry::with_retry).
    ///
    /// # Errors
    /// - [`HubError::HubReconnecting`] when the hub has no session and is
    ///   reconnecting
    /// - [`HubError::HubNotConnected`] when the hub has no session otherwise
    /// - [`HubError::InvokeFailed`] for transport or server failures and for
    ///   results that do not decode into `R`
    pub async fn invoke<R, P>(&self, hub: &str, method: &str, payload: &P) -> HubResult<R>
    where
        R: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let argument = serde_json::to_value(payload)?;
        let result = self.invoke_with_args(hub, method, vec![argument]).await?;
        serde_json::from_value(result).map_err(|e| HubError::InvokeFailed {
            hub: hub.to_string(),
            method: method.to_string(),
            reason: format!("unexpected result shape: {e}"),
        })
    }

    /// Call `method` with raw positional arguments and return the raw
    /// result (`Null` for void methods).
    ///
    /// # Errors
    /// Same as [`invoke`](Self::invoke), without the decoding step.
    pub async fn invoke_with_args(
        &self,
        hub: &str,
        method: &str,
        arguments: Vec<Value>,
    ) -> HubResult<Value> {
        if let Some(pending) = self.pending_lock(hub) {
            tracing::debug!(hub, method, "Waiting for ongoing connection before invoking");
            if let Err(e) = pending.attempt.await {
                tracing::debug!(hub, method, error = %e, "Connection attempt failed before invoke");
            }
        }

        let (session, state) = {
            let registry = self.registry();
            (
                registry.sessions.get(hub).map(|live| live.session.clone()),
                registry.state(hub),
            )
        };

        let Some(session) = session else {
            return Err(if state == HubState::Reconnecting {
                HubError::HubReconnecting {
                    hub: hub.to_string(),
                    method: method.to_string(),
                }
            } else {
                HubError::HubNotConnected {
                    hub: hub.to_string(),
                    method: method.to_string(),
                }
            });
        };

        match session.invoke(method, arguments).await {
            Ok(result) => {
                tracing::debug!(hub, method, has_result = !result.is_null(), "Invoked hub method");
                Ok(result)
            }
            Err(e) => {
                tracing::error!(hub, method, error = %e, "Error invoking hub method");
                Err(match e {
                    e @ HubError::InvokeFailed { .. } => e,
                    other => HubError::InvokeFailed {
                        hub: hub.to_string(),
                        method: method.to_string(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }
}
