//! Hub client demo
//!
//! Connects to a Phoenix hub server, creates a user, lists users, opens a
//! channel and publishes to it while printing every server push.
//!
//! Configuration comes from the environment:
//!
//! - `PHXLINK_URL` (default `ws://localhost:4000/socket/websocket`)
//! - `PHXLINK_TOKEN` auth token sent with the join, if set
//! - `RUST_LOG` log filter
//!
//! Run with: cargo run --example hub_client

use phxlink::client::ExponentialBackoff;
use phxlink::{ClientBuilder, ClientConfig, HubClient, NewUser, ObservabilityConfig};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env()
        .unwrap_or_else(|_| ClientConfig::new("ws://localhost:4000/socket/websocket"));

    let mut builder = ClientBuilder::from_config(config)
        .with_observability(ObservabilityConfig::logs_only("phxlink-hub-demo"))
        .with_reconnect(Box::new(ExponentialBackoff::default()));
    if let Ok(token) = std::env::var("PHXLINK_TOKEN") {
        builder = builder.auth_token(token);
    }

    let client = builder.connect().await?;
    tracing::info!(url = %client.config().url, "Connected");

    client.on_connection_state(|ready| {
        tracing::info!(ready, "Connection state changed");
    });
    client
        .subscribe(|envelope| async move {
            println!("push: {} on {} -> {}", envelope.event, envelope.topic, envelope.payload);
        })
        .await;

    let hub = HubClient::new(client.clone()).with_timeout(Duration::from_secs(10));

    match hub
        .create_user(&NewUser::new("demo_user", "demo@example.com", "demo-password"))
        .await
    {
        Ok(user) => println!("created user {} ({})", user.username, user.id),
        Err(e) => println!("create_user failed: {e}"),
    }

    match hub.list_users().await {
        Ok(users) => {
            for user in users {
                println!("user {}: {}", user.id, user.username);
            }
        }
        Err(e) => println!("list_users failed: {e}"),
    }

    match hub.create_channel("demo", json!({"description": "demo channel"})).await {
        Ok(channel) => {
            println!("channel {} ready", channel.name);
            hub.subscribe_channel(&channel.name).await?;
            let receipt = hub.publish(&channel.name, "hello from phxlink", json!({})).await?;
            println!("published message {}", receipt.message_id);
        }
        Err(e) => println!("create_channel failed: {e}"),
    }

    // Let pushes and a heartbeat come through
    tokio::time::sleep(Duration::from_secs(5)).await;

    client.disconnect().await?;
    phxlink::core::shutdown_observability();
    Ok(())
}
