//! Broker subscription feeding the hub.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RelayResult;
use crate::hub::RelayHub;

/// Every build log channel.
pub const LOG_PATTERN: &str = "logs:*";

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Forward broker messages into the hub forever, resubscribing after a
/// fixed delay whenever the subscription drops.
pub async fn run_bridge(client: redis::Client, hub: Arc<RelayHub>) {
    loop {
        match bridge_once(&client, &hub).await {
            Ok(()) => warn!("log subscription closed"),
            Err(e) => warn!(error = %e, "log subscription failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One subscription lifetime: pattern-subscribe and forward until the
/// broker connection ends.
pub async fn bridge_once(client: &redis::Client, hub: &RelayHub) -> RelayResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(LOG_PATTERN).await?;
    info!(pattern = LOG_PATTERN, "subscribed to log channels");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let channel = msg.get_channel_name();
        match msg.get_payload::<String>() {
            Ok(payload) => {
                hub.forward(channel, payload);
            }
            Err(e) => warn!(channel, error = %e, "skipping non-text log message"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::RedisPublisher;
    use launchpad_core::log::LogStream;
    use launchpad_core::{LogEvent, LogPublisher, ProjectId};

    #[tokio::test]
    async fn test_unreachable_broker_is_an_error() {
        let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
        let hub = RelayHub::default();
        assert!(bridge_once(&client, &hub).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis on localhost
    async fn test_published_events_reach_viewers() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let hub = Arc::new(RelayHub::default());
        let mut viewer = hub.subscribe("logs:demo");

        let client = redis::Client::open(url.as_str()).unwrap();
        let bridge = tokio::spawn(run_bridge(client, hub.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let publisher = RedisPublisher::connect(&url).unwrap();
        for i in 0..5 {
            publisher.publish(LogEvent::new(
                ProjectId::parse("demo").unwrap(),
                LogStream::Stdout,
                format!("line {}", i),
            ));
        }
        publisher.close(Duration::from_secs(3)).await;

        for i in 0..5 {
            let payload = tokio::time::timeout(Duration::from_secs(2), viewer.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payload, format!("{{\"log\":\"line {}\"}}", i));
        }
        bridge.abort();
    }
}
