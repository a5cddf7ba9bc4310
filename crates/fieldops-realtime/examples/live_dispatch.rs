//! Connects to a dispatch hub, prints pushes and lifecycle events, and
//! keeps the hub alive through network drops.
//!
//! ```bash
//! FIELDOPS_HUB_URL=https://events.example/hubs/ FIELDOPS_ACCESS_TOKEN=xxx \
//!     cargo run --example live_dispatch
//! ```

use std::sync::Arc;

use fieldops_realtime::{
    HubConnectionConfig, HubEvent, HubManager, HubManagerConfig, StaticTokenProvider,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let base_url = std::env::var("FIELDOPS_HUB_URL")?;
    let token = std::env::var("FIELDOPS_ACCESS_TOKEN")?;

    let config = HubManagerConfig::discover(None)?;
    let manager = HubManager::new(config, Arc::new(StaticTokenProvider::new(token)));

    // Monitor lifecycle events in background
    let mut events = manager.event_receiver();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                HubEvent::Connected { hub } => println!("[event] {hub} connected"),
                HubEvent::Disconnected { hub, reason } => {
                    println!("[event] {hub} disconnected: {reason}");
                }
                HubEvent::Reconnecting {
                    hub,
                    attempt,
                    delay_ms,
                } => println!("[event] {hub} reconnecting (attempt {attempt} in {delay_ms}ms)"),
                HubEvent::Reconnected { hub, attempts } => {
                    println!("[event] {hub} reconnected after {attempts} attempt(s)");
                }
                HubEvent::ReconnectFailed { hub, attempts } => {
                    println!("[event] {hub} gave up after {attempts} attempts");
                }
            }
        }
    });

    manager.on("newCall", |call| println!("[dispatch] new call: {call}"));
    manager.on("callClosed", |call| println!("[dispatch] call closed: {call}"));
    manager.on("unitMoved", |position| println!("[geo] {position}"));

    manager
        .connect(
            HubConnectionConfig::eventing("dispatch", base_url.as_str(), "dispatchHub")
                .with_methods(["newCall", "callClosed"]),
        )
        .await?;
    manager
        .connect(
            HubConnectionConfig::eventing(
                "geo",
                base_url.as_str(),
                manager.config().geolocation_hub_name.clone(),
            )
            .with_methods(["unitMoved"]),
        )
        .await?;

    println!("Connected hubs: {:?}", manager.connected_hubs());
    println!("\nListening. Press Ctrl+C to exit.");
    println!("Drop the network while this is running to see reconnection in action.\n");

    let poll = async {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            match manager
                .invoke::<serde_json::Value, _>("dispatch", "GetOpenCalls", &())
                .await
            {
                Ok(calls) => println!("[poll] open calls: {calls}"),
                Err(e) => println!("[poll] {e}"),
            }
        }
    };

    tokio::select! {
        _ = poll => {}
        _ = tokio::signal::ctrl_c() => println!("\nShutting down..."),
    }

    manager.dispose().await;
    println!("Disconnected.");
    Ok(())
}
