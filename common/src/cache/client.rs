// Redis client: serialized key/value, hash, and counter operations with
// state-gated access and health probing. The pub/sub surface and the
// reconnection supervisor live in `cache::pubsub`.

use crate::cache::pubsub::{self, MessageHandler};
use crate::config::RedisConfig;
use crate::errors::CacheError;
use crate::health::{ConnectionState, HealthCheckable, HealthReport, StateCell};
use crate::telemetry;
use async_trait::async_trait;
use redis::aio::{MultiplexedConnection, PubSubSink};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub(crate) const COMPONENT: &str = "cache";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state behind the cache client handle.
///
/// The key/value and publisher connections are multiplexed and cheap to
/// clone; the subscriber side is a dedicated connection owned by the
/// delivery task so a stalled subscriber never blocks the other roles.
pub(crate) struct CacheInner {
    pub(crate) config: RedisConfig,
    pub(crate) state: StateCell,
    pub(crate) kv: RwLock<Option<MultiplexedConnection>>,
    pub(crate) publisher: RwLock<Option<MultiplexedConnection>>,
    pub(crate) subscriptions: RwLock<HashMap<String, MessageHandler>>,
    pub(crate) sub_sink: tokio::sync::Mutex<Option<PubSubSink>>,
    pub(crate) delivery_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) reconnecting: AtomicBool,
    /// Bumped on every (re)connect so a delivery task whose connection
    /// was replaced does not trigger a second reconnection.
    pub(crate) epoch: AtomicU64,
}

/// Typed cache and messaging client.
///
/// Exactly one instance exists per process, owned by the service
/// registry. Constructed idle; `connect()` brings up all three logical
/// connections. After the reconnection budget is exhausted the client
/// stays degraded until `connect()` is called again.
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<CacheInner>,
}

impl CacheClient {
    pub fn new(config: RedisConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                state: StateCell::new(),
                kv: RwLock::new(None),
                publisher: RwLock::new(None),
                subscriptions: RwLock::new(HashMap::new()),
                sub_sink: tokio::sync::Mutex::new(None),
                delivery_task: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<CacheInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<CacheInner> {
        &self.inner
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Establish the key/value, publisher, and subscriber connections.
    ///
    /// # Errors
    /// Returns `CacheError::ConnectionFailed` if any of the three
    /// handshakes does not complete within the connect timeout.
    #[instrument(skip(self), fields(url = %self.inner.config.url))]
    pub async fn connect(&self) -> Result<(), CacheError> {
        self.inner.state.set(ConnectionState::Connecting);
        info!("Connecting to Redis");

        match self.establish().await {
            Ok(()) => {
                self.inner.state.set(ConnectionState::Ready);
                telemetry::set_component_ready(COMPONENT, true);
                info!("Redis connections ready");
                Ok(())
            }
            Err(e) => {
                self.inner.state.set(ConnectionState::Disconnected);
                error!(error = %e, "Failed to connect to Redis");
                Err(e)
            }
        }
    }

    /// Build fresh connections and swap them in. Shared between
    /// `connect()` and the reconnection supervisor; channel
    /// subscriptions that survived a transport loss are re-issued.
    pub(crate) async fn establish(&self) -> Result<(), CacheError> {
        let inner = &self.inner;
        let client = redis::Client::open(inner.config.url.as_str()).map_err(|e| {
            CacheError::ConnectionFailed(format!("failed to create Redis client: {}", e))
        })?;
        let connect_timeout = Duration::from_secs(inner.config.connect_timeout_seconds);

        let kv = connect_role(
            "key/value",
            tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection()).await,
        )?;
        let publisher = connect_role(
            "publisher",
            tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection()).await,
        )?;
        let pubsub = connect_role(
            "subscriber",
            tokio::time::timeout(connect_timeout, client.get_async_pubsub()).await,
        )?;

        let (mut sink, stream) = pubsub.split();
        let channels: Vec<String> = inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for channel in &channels {
            sink.subscribe(channel).await.map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "failed to resubscribe '{}': {}",
                    channel, e
                ))
            })?;
        }

        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *inner.kv.write().unwrap_or_else(PoisonError::into_inner) = Some(kv);
        *inner
            .publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(publisher);
        *inner.sub_sink.lock().await = Some(sink);

        let handle = tokio::spawn(pubsub::deliver_loop(Arc::clone(inner), stream, epoch));
        let previous = inner
            .delivery_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        if !channels.is_empty() {
            info!(channels = channels.len(), "Re-subscribed existing channels");
        }
        Ok(())
    }

    /// Store a value, JSON-serialized, with an optional TTL in seconds
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CacheError> {
        let mut conn = self.kv_connection()?;
        let payload = serde_json::to_string(value)?;
        telemetry::record_cache_command("set");

        let result = match ttl_seconds {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, payload, ttl).await,
            None => conn.set::<_, _, ()>(key, payload).await,
        };
        result.map_err(|e| self.command_error("set", e))?;

        debug!(key, ttl = ?ttl_seconds, "Cache SET");
        Ok(())
    }

    /// Fetch and decode a value; a missing or expired key is `None`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("get");

        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| self.command_error("get", e))?;

        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove a key; returns the number of keys removed
    pub async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("delete");

        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| self.command_error("delete", e))?;
        debug!(key, removed, "Cache DEL");
        Ok(removed)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("exists");

        conn.exists(key)
            .await
            .map_err(|e| self.command_error("exists", e))
    }

    /// Set a TTL on an existing key; false if the key does not exist
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("expire");

        conn.expire(key, ttl_seconds as i64)
            .await
            .map_err(|e| self.command_error("expire", e))
    }

    /// Remaining TTL in seconds; -2 if the key is missing, -1 if the key
    /// has no expiry (the store's own convention)
    pub async fn time_to_live(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("ttl");

        conn.ttl(key)
            .await
            .map_err(|e| self.command_error("ttl", e))
    }

    /// Atomically add one to an integer value
    pub async fn increment(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("increment");

        conn.incr(key, 1i64)
            .await
            .map_err(|e| self.counter_error("increment", e))
    }

    /// Atomically subtract one from an integer value
    pub async fn decrement(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("decrement");

        conn.decr(key, 1i64)
            .await
            .map_err(|e| self.counter_error("decrement", e))
    }

    /// Store one field of a hash, JSON-serialized
    pub async fn hash_set<T: Serialize>(
        &self,
        key: &str,
        field: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let mut conn = self.kv_connection()?;
        let payload = serde_json::to_string(value)?;
        telemetry::record_cache_command("hash_set");

        conn.hset::<_, _, _, ()>(key, field, payload)
            .await
            .map_err(|e| self.command_error("hash_set", e))?;
        debug!(key, field, "Cache HSET");
        Ok(())
    }

    pub async fn hash_get<T: DeserializeOwned>(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<T>, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("hash_get");

        let raw: Option<String> = conn
            .hget(key, field)
            .await
            .map_err(|e| self.command_error("hash_get", e))?;

        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Fetch every field of a hash, decoded
    pub async fn hash_get_all<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<HashMap<String, T>, CacheError> {
        let mut conn = self.kv_connection()?;
        telemetry::record_cache_command("hash_get_all");

        let raw: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| self.command_error("hash_get_all", e))?;

        let mut decoded = HashMap::with_capacity(raw.len());
        for (field, payload) in raw {
            decoded.insert(field, serde_json::from_str(&payload)?);
        }
        Ok(decoded)
    }

    /// Destructive: remove every key. Intended only for controlled
    /// maintenance.
    pub async fn flush_all(&self) -> Result<(), CacheError> {
        let mut conn = self.kv_connection()?;
        warn!("Cache FLUSHALL requested; clearing every key");
        telemetry::record_cache_command("flushall");

        redis::cmd("FLUSHALL")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.command_error("flushall", e))?;
        Ok(())
    }

    /// Latency-measuring PING probe. Never raises; a degraded client is
    /// reported unhealthy with its state so callers can detect a
    /// terminally degraded connection.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthReport {
        let state = self.inner.state.get();
        let conn = self
            .inner
            .kv
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(mut conn) = conn else {
            return HealthReport::unhealthy(COMPONENT, state, "not connected");
        };
        if state != ConnectionState::Ready {
            return HealthReport::unhealthy(COMPONENT, state, "connection not ready");
        }

        let started = Instant::now();
        let ping = redis::cmd("PING");
        let probe = tokio::time::timeout(
            HEALTH_CHECK_TIMEOUT,
            ping.query_async::<String>(&mut conn),
        );
        match probe.await {
            Ok(Ok(response)) if response == "PONG" => HealthReport::healthy(
                COMPONENT,
                self.inner.state.get(),
                started.elapsed().as_millis() as u64,
            ),
            Ok(Ok(response)) => HealthReport::unhealthy(
                COMPONENT,
                self.inner.state.get(),
                format!("unexpected PING response: {}", response),
            ),
            Ok(Err(e)) => {
                debug!(error = %e, "Cache health probe failed");
                HealthReport::unhealthy(COMPONENT, self.inner.state.get(), e.to_string())
            }
            Err(_) => HealthReport::unhealthy(
                COMPONENT,
                self.inner.state.get(),
                format!(
                    "health probe timed out after {}ms",
                    HEALTH_CHECK_TIMEOUT.as_millis()
                ),
            ),
        }
    }

    /// Stop the delivery task and drop all connections. Subsequent
    /// operations fail with `CacheError::NotConnected`.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.inner.state.set(ConnectionState::Disconnected);

        let task = self
            .inner
            .delivery_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }

        *self.inner.sub_sink.lock().await = None;
        *self.inner.kv.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .inner
            .publisher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        telemetry::set_component_ready(COMPONENT, false);
        info!("Redis connections closed");
    }

    pub(crate) fn kv_connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if self.inner.state.get() != ConnectionState::Ready {
            return Err(CacheError::NotConnected);
        }
        self.inner
            .kv
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CacheError::NotConnected)
    }

    pub(crate) fn publisher_connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if self.inner.state.get() != ConnectionState::Ready {
            return Err(CacheError::NotConnected);
        }
        self.inner
            .publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CacheError::NotConnected)
    }

    /// Classify a command failure. Transport faults demote the client to
    /// degraded and wake the reconnection supervisor; everything else
    /// propagates verbatim for the caller to decide.
    pub(crate) fn command_error(&self, command: &'static str, err: redis::RedisError) -> CacheError {
        telemetry::record_cache_failure(command);
        if is_transport_fault(&err) {
            pubsub::note_transport_fault(&self.inner);
            CacheError::Transport(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            CacheError::TypeMismatch(err.to_string())
        } else {
            CacheError::CommandFailed(err.to_string())
        }
    }

    fn counter_error(&self, command: &'static str, err: redis::RedisError) -> CacheError {
        // INCR/DECR on a non-numeric value comes back as a plain server
        // error rather than WRONGTYPE
        if err.kind() == redis::ErrorKind::TypeError || err.to_string().contains("not an integer") {
            telemetry::record_cache_failure(command);
            CacheError::TypeMismatch(err.to_string())
        } else {
            self.command_error(command, err)
        }
    }
}

fn connect_role<T>(
    role: &'static str,
    outcome: Result<Result<T, redis::RedisError>, tokio::time::error::Elapsed>,
) -> Result<T, CacheError> {
    match outcome {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(CacheError::ConnectionFailed(format!(
            "{} connection failed: {}",
            role, e
        ))),
        Err(_) => Err(CacheError::ConnectionFailed(format!(
            "{} connection timed out",
            role
        ))),
    }
}

fn is_transport_fault(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_timeout()
        || err.is_unrecoverable_error()
}

#[async_trait]
impl HealthCheckable for CacheClient {
    fn component_name(&self) -> &'static str {
        COMPONENT
    }

    async fn health_check(&self) -> HealthReport {
        CacheClient::health_check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout_seconds: 5,
            reconnect_base_delay_ms: 100,
            reconnect_max_delay_ms: 3000,
            reconnect_max_attempts: 10,
        }
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail_with_not_connected() {
        let client = CacheClient::new(test_config());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let err = client.get::<serde_json::Value>("missing").await.unwrap_err();
        assert!(matches!(err, CacheError::NotConnected));

        let err = client.increment("counter").await.unwrap_err();
        assert!(matches!(err, CacheError::NotConnected));

        let report = client.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_store_fails() {
        let client = CacheClient::new(RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout_seconds: 1,
            reconnect_base_delay_ms: 100,
            reconnect_max_delay_ms: 3000,
            reconnect_max_attempts: 2,
        });

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, CacheError::ConnectionFailed(_)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_scalar_round_trip_and_absence() {
        let client = CacheClient::new(test_config());
        client.connect().await.expect("connect");

        let key = format!("test:scalar:{}", uuid::Uuid::new_v4());
        client
            .set(&key, &serde_json::json!({"a": 1}), None)
            .await
            .expect("set");

        let value: Option<serde_json::Value> = client.get(&key).await.expect("get");
        assert_eq!(value, Some(serde_json::json!({"a": 1})));

        client.delete(&key).await.expect("delete");
        let value: Option<serde_json::Value> = client.get(&key).await.expect("get");
        assert_eq!(value, None);

        client.close().await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_counter_type_mismatch() {
        let client = CacheClient::new(test_config());
        client.connect().await.expect("connect");

        let key = format!("test:mismatch:{}", uuid::Uuid::new_v4());
        client.set(&key, &"not a number", None).await.expect("set");

        let err = client.increment(&key).await.unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch(_)));

        client.delete(&key).await.expect("delete");
        client.close().await;
    }
}
