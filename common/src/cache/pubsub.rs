// Publish/subscribe surface and the reconnection supervisor.
//
// Inbound messages flow through a dedicated delivery task that owns the
// subscriber half of a split pub/sub connection; handler registration
// goes through the sink half. Publishes use their own multiplexed
// connection, so a slow subscriber cannot block them.

use crate::cache::client::{CacheClient, CacheInner, COMPONENT};
use crate::errors::CacheError;
use crate::health::ConnectionState;
use crate::retry::{LinearBackoff, RetryStrategy};
use crate::telemetry;
use futures::StreamExt;
use redis::aio::PubSubStream;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tracing::{debug, error, info, instrument, warn};

/// Handler invoked once per message published on a subscribed channel.
/// A failing handler is logged and does not affect the delivery loop or
/// other channels.
pub type MessageHandler = Arc<dyn Fn(Value) -> Result<(), CacheError> + Send + Sync>;

impl CacheClient {
    /// Serialize and send a message to every current subscriber of
    /// `channel`. Returns the number of receivers; zero subscribers is
    /// success, not an error. Does not wait for any acknowledgment.
    #[instrument(skip(self, message))]
    pub async fn publish<T: Serialize>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<u64, CacheError> {
        let mut conn = self.publisher_connection()?;
        let payload = serde_json::to_string(message)?;
        telemetry::record_cache_command("publish");

        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| self.command_error("publish", e))?;

        debug!(channel, receivers, "Published message");
        Ok(receivers.max(0) as u64)
    }

    /// Register `handler` for every future publish on `channel` until
    /// `unsubscribe`. Re-subscribing a channel replaces its handler.
    pub async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), CacheError> {
        if self.state() != ConnectionState::Ready {
            return Err(CacheError::NotConnected);
        }

        let replaced = self
            .inner()
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string(), handler)
            .is_some();
        if replaced {
            debug!(channel, "Replacing existing subscription handler");
        }

        let mut sink_guard = self.inner().sub_sink.lock().await;
        let Some(sink) = sink_guard.as_mut() else {
            self.inner()
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(channel);
            return Err(CacheError::NotConnected);
        };

        if let Err(e) = sink.subscribe(channel).await {
            if !replaced {
                self.inner()
                    .subscriptions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(channel);
            }
            return Err(self.command_error("subscribe", e));
        }

        debug!(channel, "Subscribed to channel");
        Ok(())
    }

    /// Drop the handler for `channel` and stop receiving its messages
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), CacheError> {
        if self.state() != ConnectionState::Ready {
            return Err(CacheError::NotConnected);
        }

        {
            let mut sink_guard = self.inner().sub_sink.lock().await;
            if let Some(sink) = sink_guard.as_mut() {
                sink.unsubscribe(channel)
                    .await
                    .map_err(|e| self.command_error("unsubscribe", e))?;
            }
        }

        self.inner()
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
        debug!(channel, "Unsubscribed from channel");
        Ok(())
    }
}

/// Drain the subscriber stream, dispatching each message to its
/// registered handler. The stream only ends when the connection is
/// gone; if this client is still current, that is a transport loss.
pub(crate) async fn deliver_loop(inner: Arc<CacheInner>, mut stream: PubSubStream, epoch: u64) {
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel, error = %e, "Discarding non-text message payload");
                continue;
            }
        };
        dispatch_payload(&inner, &channel, &payload);
    }

    if inner.epoch.load(Ordering::SeqCst) == epoch
        && inner
            .state
            .transition(ConnectionState::Ready, ConnectionState::Degraded)
    {
        warn!("Subscriber connection lost, entering degraded state");
        telemetry::set_component_ready(COMPONENT, false);
        spawn_reconnect(inner);
    }
}

/// Decode one inbound payload and hand it to the channel's handler.
/// Handler faults and undecodable payloads are logged, never fatal.
pub(crate) fn dispatch_payload(inner: &CacheInner, channel: &str, payload: &str) {
    let message: Value = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(channel, error = %e, "Discarding undecodable message");
            return;
        }
    };

    let handler = inner
        .subscriptions
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(channel)
        .cloned();

    match handler {
        Some(handler) => {
            if let Err(e) = handler(message) {
                error!(channel, error = %e, "Subscription handler failed");
            }
        }
        None => debug!(channel, "No handler registered for channel"),
    }
}

/// Demote to degraded on a transport fault and wake the supervisor.
/// Only the first fault observed in the ready state triggers it.
pub(crate) fn note_transport_fault(inner: &Arc<CacheInner>) {
    if inner
        .state
        .transition(ConnectionState::Ready, ConnectionState::Degraded)
    {
        warn!("Cache transport fault, entering degraded state");
        telemetry::set_component_ready(COMPONENT, false);
        spawn_reconnect(Arc::clone(inner));
    }
}

/// Reconnection supervisor: bounded linear backoff, then terminal
/// degradation until the owning process calls `connect()` again.
/// Faults inside the loop are absorbed and logged, never surfaced.
pub(crate) fn spawn_reconnect(inner: Arc<CacheInner>) {
    if inner
        .reconnecting
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    tokio::spawn(async move {
        let backoff = LinearBackoff::new(
            inner.config.reconnect_base_delay_ms,
            inner.config.reconnect_max_delay_ms,
            inner.config.reconnect_max_attempts,
        );
        let client = CacheClient::from_inner(Arc::clone(&inner));

        let mut attempt = 1;
        while let Some(delay) = backoff.next_delay(attempt) {
            tokio::time::sleep(delay).await;

            if inner.state.get() != ConnectionState::Degraded {
                // close() or an explicit connect() took over
                break;
            }

            telemetry::record_cache_reconnect_attempt();
            info!(attempt, "Attempting cache reconnection");
            match client.establish().await {
                Ok(()) => {
                    inner.state.set(ConnectionState::Ready);
                    telemetry::set_component_ready(COMPONENT, true);
                    info!(attempt, "Cache connection restored");
                    inner.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                Err(e) => debug!(attempt, error = %e, "Reconnection attempt failed"),
            }
            attempt += 1;
        }

        if inner.state.get() == ConnectionState::Degraded {
            warn!(
                max_attempts = inner.config.reconnect_max_attempts,
                "Cache reconnection attempts exhausted; staying degraded until connect() is called again"
            );
        }
        inner.reconnecting.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use std::sync::atomic::AtomicUsize;

    fn test_client() -> CacheClient {
        CacheClient::new(RedisConfig {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_seconds: 5,
            reconnect_base_delay_ms: 100,
            reconnect_max_delay_ms: 3000,
            reconnect_max_attempts: 10,
        })
    }

    fn register(client: &CacheClient, channel: &str, handler: MessageHandler) {
        client
            .inner()
            .subscriptions
            .write()
            .unwrap()
            .insert(channel.to_string(), handler);
    }

    #[test]
    fn test_dispatch_invokes_registered_handler() {
        let client = test_client();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        register(
            &client,
            "orders",
            Arc::new(move |message| {
                assert_eq!(message["id"], 7);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        dispatch_payload(client.inner(), "orders", r#"{"id":7}"#);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_does_not_stop_later_deliveries() {
        let client = test_client();
        let invocations = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invocations);
        register(
            &client,
            "orders",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CacheError::HandlerFailed {
                    channel: "orders".to_string(),
                    cause: "boom".to_string(),
                })
            }),
        );

        dispatch_payload(client.inner(), "orders", r#"{"id":1}"#);
        dispatch_payload(client.inner(), "orders", r#"{"id":2}"#);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_skips_other_channels_and_undecodable_payloads() {
        let client = test_client();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        register(
            &client,
            "orders",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        // Unregistered channel and broken payload must both be silent no-ops
        dispatch_payload(client.inner(), "chat", r#"{"id":1}"#);
        dispatch_payload(client.inner(), "orders", "{not json");
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_rejected() {
        let client = test_client();
        let err = client
            .subscribe("orders", Arc::new(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotConnected));
        assert!(client.inner().subscriptions.read().unwrap().is_empty());
    }
}
