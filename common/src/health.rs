// Connection lifecycle state and health reporting shared by both
// resource components

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a resource component.
///
/// Transitions: `Disconnected → Connecting → Ready ⇄ Degraded → Disconnected`.
/// `Degraded → Ready` only happens through a successful reconnect;
/// `Connecting → Disconnected` is the failure path when the initial
/// handshake never succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Degraded => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Degraded,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lock-free holder for a component's `ConnectionState`
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Create a new cell in the `Disconnected` state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, next: ConnectionState) {
        self.0.store(next.as_u8(), Ordering::Release);
    }

    /// Atomically move from `from` to `to`. Returns false if the current
    /// state is not `from`, leaving the cell untouched.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Structured result of a component health probe. Probes never raise;
/// failures are reported through `status` and `error`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub component: String,
    pub status: HealthStatus,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(component: &str, state: ConnectionState, latency_ms: u64) -> Self {
        Self {
            component: component.to_string(),
            status: HealthStatus::Healthy,
            state,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn unhealthy(component: &str, state: ConnectionState, error: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            status: HealthStatus::Unhealthy,
            state,
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Probe seam consumed by the process-level health endpoint
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    fn component_name(&self) -> &'static str;

    async fn health_check(&self) -> HealthReport;
}
