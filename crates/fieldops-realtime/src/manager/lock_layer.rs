use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;

use crate::endpoint::HubConnectionConfig;
use crate::error::{HubError, HubResult};

use super::HubManager;

/// Outcome of one in-flight connect attempt, awaitable by any number of
/// callers.
pub(super) type SharedAttempt = Shared<BoxFuture<'static, HubResult<()>>>;

/// Marker for "a connect attempt for this hub is running".
#[derive(Clone)]
pub(crate) struct ConnectionLock {
    pub id: u64,
    pub attempt: SharedAttempt,
}

impl HubManager {
    /// Connect to a hub, or join the attempt already in flight for it.
    ///
    /// Concurrent calls for the same hub name share one session build and
    /// observe the same outcome. If the awaited attempt failed, a new
    /// attempt is started unless another caller already started one.
    ///
    /// # Errors
    /// - [`HubError::NoAuthToken`] when no access token is available
    /// - [`HubError::MissingEndpoint`] / [`HubError::InvalidEndpoint`] for a
    ///   bad config
    /// - transport errors such as [`HubError::ConnectFailed`]
    pub async fn connect(&self, config: HubConnectionConfig) -> HubResult<()> {
        self.connect_guarded(config, None).await
    }

    /// [`connect`](Self::connect) that gives up before starting a new
    /// attempt once `guard` is cancelled.
    pub(super) async fn connect_guarded(
        &self,
        config: HubConnectionConfig,
        guard: Option<&CancellationToken>,
    ) -> HubResult<()> {
        let hub = config.name.clone();

        if let Some(pending) = self.pending_lock(&hub) {
            tracing::info!(hub, "Connection already in progress, waiting");
            if let Err(e) = pending.attempt.clone().await {
                tracing::debug!(hub, error = %e, "Awaited connection attempt failed");
            }

            if self.is_connected(&hub) {
                return Ok(());
            }

            if let Some(current) = self.pending_lock(&hub) {
                if current.id != pending.id {
                    return current.attempt.await;
                }
            }
        }

        if guard.is_some_and(CancellationToken::is_cancelled) {
            return Err(HubError::ConnectFailed {
                hub,
                reason: "reconnection cancelled".into(),
            });
        }

        let lock = self.start_or_join_attempt(&config);
        lock.attempt.await
    }

    pub(super) fn pending_lock(&self, hub: &str) -> Option<ConnectionLock> {
        self.registry().locks.get(hub).cloned()
    }

    /// Return the running attempt for the hub, or start one.
    ///
    /// The attempt runs on its own task so it completes, and releases its
    /// lock, even if every caller stops waiting.
    fn start_or_join_attempt(&self, config: &HubConnectionConfig) -> ConnectionLock {
        let mut registry = self.registry();
        if let Some(lock) = registry.locks.get(&config.name) {
            return lock.clone();
        }

        let id = self.next_id();
        let hub = config.name.clone();
        let this = self.clone();
        let owned = config.clone();
        // The registry stays locked until the lock is stored, so the task
        // cannot release it before it exists.
        let handle = tokio::spawn(async move {
            let mut release = LockRelease {
                manager: this.clone(),
                hub: owned.name.clone(),
                id,
                settled: false,
            };
            let result = this.connect_internal(owned, id).await;
            release.settled = true;
            result
        });

        let attempt = async move {
            handle.await.unwrap_or_else(|e| {
                Err(HubError::ConnectFailed {
                    hub,
                    reason: format!("connect task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared();

        let lock = ConnectionLock { id, attempt };
        registry.locks.insert(config.name.clone(), lock.clone());
        lock
    }

    fn release_lock(&self, hub: &str, id: u64, settled: bool) {
        let mut registry = self.registry();
        if registry.locks.get(hub).is_some_and(|lock| lock.id == id) {
            registry.locks.remove(hub);
            if !settled {
                registry.settle_after_failure(hub);
            }
        }
    }
}

/// Releases an attempt's lock when its task ends, including by panic.
struct LockRelease {
    manager: HubManager,
    hub: String,
    id: u64,
    settled: bool,
}

impl Drop for LockRelease {
    fn drop(&mut self) {
        if !self.settled {
            tracing::error!(hub = %self.hub, "Connect attempt aborted before settling");
        }
        self.manager.release_lock(&self.hub, self.id, self.settled);
    }
}
