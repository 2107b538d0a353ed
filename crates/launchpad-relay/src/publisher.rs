//! Publish side of the relay: build log events onto the broker.
//!
//! A background task owns the broker connection and drains an ordered queue,
//! so `publish` returns immediately and events leave in call order.

use async_trait::async_trait;
use launchpad_core::{LogEvent, LogPublisher};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RelayResult;

/// How long to drop events after a failed connect before trying again.
const RECONNECT_AFTER: Duration = Duration::from_secs(1);
/// Bound on opening the broker connection and on each publish.
pub const BROKER_TIMEOUT: Duration = Duration::from_secs(10);

enum Command {
    Publish(LogEvent),
    Close(oneshot::Sender<()>),
}

pub struct RedisPublisher {
    tx: mpsc::UnboundedSender<Command>,
}

impl RedisPublisher {
    /// Validate the broker URL and start the drain task. The connection
    /// itself is opened lazily, so an unreachable broker never stalls the
    /// caller.
    pub fn connect(url: &str) -> RelayResult<Self> {
        Self::with_timeout(url, BROKER_TIMEOUT)
    }

    /// Like [`connect`](Self::connect) with a custom bound on broker calls.
    pub fn with_timeout(url: &str, timeout: Duration) -> RelayResult<Self> {
        let client = redis::Client::open(url)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(client, rx, timeout));
        Ok(Self { tx })
    }
}

async fn drain(
    client: redis::Client,
    mut rx: mpsc::UnboundedReceiver<Command>,
    timeout: Duration,
) {
    let mut conn: Option<MultiplexedConnection> = None;
    let mut retry_at: Option<Instant> = None;

    while let Some(command) = rx.recv().await {
        let event = match command {
            Command::Publish(event) => event,
            Command::Close(done) => {
                debug!("log queue drained");
                let _ = done.send(());
                return;
            }
        };

        if conn.is_none() && retry_at.is_none_or(|at| Instant::now() >= at) {
            match tokio::time::timeout(timeout, client.get_multiplexed_async_connection()).await {
                Ok(Ok(c)) => {
                    info!("connected to log broker");
                    conn = Some(c);
                    retry_at = None;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "log broker unavailable");
                    retry_at = Some(Instant::now() + RECONNECT_AFTER);
                }
                Err(_) => {
                    warn!(?timeout, "timed out connecting to log broker");
                    retry_at = Some(Instant::now() + RECONNECT_AFTER);
                }
            }
        }

        let Some(c) = conn.as_mut() else {
            debug!(channel = %event.channel(), "dropping log event");
            continue;
        };
        let published = tokio::time::timeout(timeout, async {
            let receivers: redis::RedisResult<i64> =
                c.publish(event.channel(), event.to_wire()).await;
            receivers
        })
        .await;
        match published {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(channel = %event.channel(), error = %e, "failed to publish log event");
                conn = None;
            }
            Err(_) => {
                warn!(channel = %event.channel(), ?timeout, "publish timed out");
                conn = None;
                retry_at = Some(Instant::now() + RECONNECT_AFTER);
            }
        }
    }
}

#[async_trait]
impl LogPublisher for RedisPublisher {
    fn publish(&self, event: LogEvent) {
        if self.tx.send(Command::Publish(event)).is_err() {
            warn!("log publisher already closed");
        }
    }

    async fn close(&self, grace: Duration) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Close(done_tx)).is_err() {
            return;
        }
        match tokio::time::timeout(grace, done_rx).await {
            Ok(_) => info!("log publisher closed"),
            Err(_) => warn!(?grace, "log publisher did not flush in time"),
        }
    }
}
