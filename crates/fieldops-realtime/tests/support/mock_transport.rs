#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fieldops_realtime::{
    HubError, HubResult, HubSession, SessionConnector, SessionHandlers, SessionRequest,
    TokenProvider,
};
use serde_json::Value;

pub const WAIT_LIMIT: Duration = Duration::from_secs(600);

/// Poll `condition` every 10ms of (possibly paused) tokio time.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scripted in-memory session.
pub struct MockSession {
    request: SessionRequest,
    handlers: SessionHandlers,
    connected: AtomicBool,
    stopped: AtomicBool,
    responses: Arc<Mutex<HashMap<String, HubResult<Value>>>>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockSession {
    pub fn request(&self) -> &SessionRequest {
        &self.request
    }

    /// Simulate an inbound push from the server.
    pub fn push(&self, method: &str, arguments: Vec<Value>) -> bool {
        self.handlers.deliver(method, arguments)
    }

    /// Simulate an unexpected network drop.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.handlers.closed(Some(HubError::ConnectionLost {
            reason: "simulated network drop".into(),
        }));
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubSession for MockSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> HubResult<Value> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), arguments));
        self.responses
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ConnectorState {
    requests: Vec<SessionRequest>,
    outcomes: VecDeque<HubResult<()>>,
    panics: usize,
    sessions: Vec<Arc<MockSession>>,
    build_delay: Duration,
}

/// Connector that records every build and follows a script of outcomes.
/// Builds succeed once the script is empty.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    responses: Arc<Mutex<HashMap<String, HubResult<Value>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next build.
    pub fn push_outcome(&self, outcome: HubResult<()>) {
        self.state.lock().unwrap().outcomes.push_back(outcome);
    }

    pub fn fail_next(&self, count: usize) {
        for _ in 0..count {
            self.push_outcome(Err(HubError::ConnectFailed {
                hub: "mock".into(),
                reason: "scripted failure".into(),
            }));
        }
    }

    /// Make the next `count` builds panic instead of returning.
    pub fn panic_next(&self, count: usize) {
        self.state.lock().unwrap().panics = count;
    }

    pub fn set_build_delay(&self, delay: Duration) {
        self.state.lock().unwrap().build_delay = delay;
    }

    /// Result returned by every session for `method`.
    pub fn respond(&self, method: &str, result: HubResult<Value>) {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), result);
    }

    pub fn build_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn last_session(&self) -> Arc<MockSession> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .last()
            .cloned()
            .expect("no session was built")
    }

    pub fn live_sessions(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .filter(|s| s.is_connected())
            .count()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        request: SessionRequest,
        handlers: SessionHandlers,
    ) -> HubResult<Arc<dyn HubSession>> {
        let (delay, panic) = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            let panic = state.panics > 0;
            state.panics = state.panics.saturating_sub(1);
            (state.build_delay, panic)
        };
        assert!(!panic, "connector blew up mid-build");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.state.lock().unwrap().outcomes.pop_front();
        if let Some(Err(e)) = outcome {
            return Err(e);
        }

        let session = Arc::new(MockSession {
            request,
            handlers,
            connected: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            responses: Arc::clone(&self.responses),
            invocations: Mutex::new(Vec::new()),
        });
        self.state
            .lock()
            .unwrap()
            .sessions
            .push(Arc::clone(&session));
        Ok(session)
    }
}

/// Token provider that counts refreshes and can be told to fail them.
#[derive(Default)]
pub struct MockTokens {
    token: Mutex<Option<String>>,
    refreshes: Mutex<u32>,
    refresh_failures: Mutex<u32>,
}

impl MockTokens {
    pub fn new(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            ..Self::default()
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(str::to_string);
    }

    pub fn fail_next_refreshes(&self, count: u32) {
        *self.refresh_failures.lock().unwrap() = count;
    }

    pub fn refreshes(&self) -> u32 {
        *self.refreshes.lock().unwrap()
    }
}

#[async_trait]
impl TokenProvider for MockTokens {
    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    async fn refresh_token(&self) -> HubResult<()> {
        *self.refreshes.lock().unwrap() += 1;
        let mut failures = self.refresh_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(HubError::TokenRefreshFailed {
                reason: "identity provider unavailable".into(),
            });
        }
        Ok(())
    }
}
