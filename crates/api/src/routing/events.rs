//! Tenant event feed over Redis pub/sub
//!
//! Writers publish JSON [`TenantEvent`]s on a channel; every instance runs a
//! [`TenantEventListener`] that applies them to its local cache.

use std::time::{Duration, Instant};

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use super::invalidator::{CacheInvalidator, TenantEvent};

/// Default pub/sub channel
pub const DEFAULT_EVENTS_CHANNEL: &str = "tenantry:tenant-events";

/// First reconnect delay; doubles per attempt
const RECONNECT_BASE_DELAY_MS: u64 = 100;

/// Maximum delay between reconnect attempts
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// A session that lasted this long resets the backoff
const STABLE_SESSION: Duration = Duration::from_secs(60);

/// Event feed errors
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Decode a JSON event payload
pub fn decode_event(payload: &str) -> Result<TenantEvent, EventError> {
    Ok(serde_json::from_str(payload)?)
}

/// Publish an event. Returns the number of subscribers that received it.
pub async fn publish_event(
    conn: &mut ConnectionManager,
    channel: &str,
    event: &TenantEvent,
) -> Result<usize, EventError> {
    let payload = serde_json::to_string(event)?;
    let receivers: usize = conn.publish(channel, payload).await?;
    Ok(receivers)
}

/// Subscribes to the event channel and feeds events to the invalidator,
/// reconnecting with exponential backoff.
pub struct TenantEventListener {
    client: redis::Client,
    channel: String,
    invalidator: CacheInvalidator,
}

impl TenantEventListener {
    pub fn new(
        redis_url: &str,
        channel: impl Into<String>,
        invalidator: CacheInvalidator,
    ) -> Result<Self, EventError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            channel: channel.into(),
            invalidator,
        })
    }

    /// Run until the task is aborted
    pub async fn run(self) {
        let mut backoff = reconnect_backoff();

        loop {
            let started = Instant::now();

            match self.listen().await {
                Ok(()) => tracing::warn!(channel = %self.channel, "Tenant event stream ended"),
                Err(e) => tracing::warn!(
                    channel = %self.channel,
                    error = %e,
                    "Tenant event listener disconnected"
                ),
            }

            if started.elapsed() >= STABLE_SESSION {
                backoff = reconnect_backoff();
            }

            let delay = backoff.next().unwrap_or(RECONNECT_MAX_DELAY);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting to tenant events");
            tokio::time::sleep(delay).await;
        }
    }

    async fn listen(&self) -> Result<(), EventError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.channel.as_str()).await?;

        // Events published while unsubscribed are lost
        let flushed = self.invalidator.flush_all();
        tracing::info!(channel = %self.channel, flushed, "Subscribed to tenant events");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring non-text tenant event");
                    continue;
                }
            };

            match decode_event(&payload) {
                Ok(event) => {
                    self.invalidator.apply(&event);
                }
                Err(e) => {
                    tracing::warn!(error = %e, payload = %payload, "Ignoring malformed tenant event");
                }
            }
        }

        Ok(())
    }
}

fn reconnect_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(RECONNECT_BASE_DELAY_MS / 2)
        .max_delay(RECONNECT_MAX_DELAY)
        .map(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_shared::TenantId;

    #[test]
    fn test_decode_events() {
        let created = decode_event(
            r#"{"event":"created","tenant_id":3,"domains":["acme.com","acme.io"]}"#,
        )
        .unwrap();
        assert_eq!(
            created,
            TenantEvent::Created {
                tenant_id: TenantId(3),
                domains: vec!["acme.com".into(), "acme.io".into()],
            }
        );

        let deleted = decode_event(r#"{"event":"deleted","tenant_id":3,"domains":[]}"#).unwrap();
        assert_eq!(deleted.tenant_id(), Some(TenantId(3)));
    }

    #[test]
    fn test_decode_rejects_unknown_events() {
        assert!(matches!(
            decode_event(r#"{"event":"renamed","tenant_id":3}"#),
            Err(EventError::Payload(_))
        ));
        assert!(decode_event("not json").is_err());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let delays: Vec<Duration> = reconnect_backoff().take(20).collect();
        assert_eq!(delays.len(), 20);
        assert!(delays.iter().all(|d| *d <= RECONNECT_MAX_DELAY));
    }

    #[test]
    fn test_invalid_redis_url() {
        let cache = std::sync::Arc::new(crate::routing::ResolutionCache::default());
        let invalidator = CacheInvalidator::new(
            cache,
            std::sync::Arc::new(crate::routing::DomainNormalizer::default()),
        );
        assert!(matches!(
            TenantEventListener::new("not a url", DEFAULT_EVENTS_CHANNEL, invalidator),
            Err(EventError::Redis(_))
        ));
    }
}
