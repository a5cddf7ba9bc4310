//! # fieldops-realtime
//!
//! Client-side connection manager for realtime hubs (SignalR JSON protocol
//! over WebSocket) used by field-operations apps for live dispatch, voice,
//! and geolocation events.
//!
//! A single [`HubManager`] opens, multiplexes, supervises, and recovers one
//! long-lived connection per named hub. Many collaborators may ask for the
//! same hub concurrently; only one connection attempt per hub is ever in
//! flight.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use fieldops_realtime::{
//!     HubConnectionConfig, HubManager, HubManagerConfig, StaticTokenProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> fieldops_realtime::HubResult<()> {
//!     // Load config from environment or realtime.toml
//!     let config = HubManagerConfig::discover(None)?;
//!     let tokens = Arc::new(StaticTokenProvider::new("access-token"));
//!     let manager = HubManager::new(config, tokens);
//!
//!     // Listen for pushes from any hub
//!     manager.on("newCall", |call| println!("New call: {call}"));
//!
//!     // Eventing form: the hub name is appended to the base URL path
//!     manager
//!         .connect(
//!             HubConnectionConfig::eventing("dispatch", "https://events.example/hubs/", "dispatchHub")
//!                 .with_methods(["newCall", "callClosed"]),
//!         )
//!         .await?;
//!
//!     let units: Vec<String> = manager
//!         .invoke("dispatch", "GetAvailableUnits", &serde_json::json!({"station": 3}))
//!         .await?;
//!     println!("{units:?}");
//!
//!     manager.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! | Layer | Type | Reconnect | Best for |
//! |-------|------|-----------|----------|
//! | Transport | [`SignalRSession`](client::SignalRSession) | No | Testing, full control |
//! | Manager | [`HubManager`] | Yes | Applications |
//!
//! ## Configuration
//!
//! See [`HubManagerConfig`] for the full configuration reference.
//! Environment overrides:
//!
//! ```bash
//! export FIELDOPS_GEO_HUB_NAME="geolocationHub"
//! export FIELDOPS_RECONNECT_MAX_ATTEMPTS=5
//! export FIELDOPS_RECONNECT_BASE_DELAY_MS=5000
//! ```
//!
//! Or a `realtime.toml` file:
//!
//! ```toml
//! geolocation_hub_name = "geolocationHub"
//!
//! [reconnect]
//! max_attempts = 5
//! base_delay_ms = 5000
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod retry;
pub mod session;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use auth::{StaticTokenProvider, TokenProvider};
pub use client::{SignalRConnector, SignalRSession};
pub use config::HubManagerConfig;
pub use endpoint::{ConnectTarget, HubConnectionConfig, HubEndpoint};
pub use error::{HubError, HubResult};
pub use events::{EventDispatcher, ListenerId};
pub use manager::{HubEvent, HubManager, HubState};
pub use session::{HubSession, SessionConnector, SessionHandlers, SessionRequest};
