use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::utils::CircuitState;

// ============================================================================
// Health Monitor
// ============================================================================
//
// Components push their status here (the consumer on every state change,
// the HTTP layer after probing the database); GET /health reads a snapshot.
// The overall status is the worst status of any component.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    /// Dead-letter producer health as seen through its circuit breaker
    pub fn from_circuit(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => {
                HealthStatus::Degraded("Circuit breaker half-open".to_string())
            }
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Default)]
pub struct HealthMonitor {
    components: RwLock<HashMap<String, ComponentHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, component: &str, status: HealthStatus, details: Option<String>) {
        tracing::debug!(component, status = ?status, "Updated component health");

        let health = ComponentHealth {
            name: component.to_string(),
            status,
            last_check: Utc::now(),
            details,
        };
        self.components
            .write()
            .await
            .insert(component.to_string(), health);
    }

    pub async fn snapshot(&self) -> SystemHealth {
        let components = self.components.read().await.clone();

        SystemHealth {
            overall_status: overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }
}

fn overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    if components.values().all(|health| health.status.is_healthy()) {
        return HealthStatus::Healthy;
    }

    let mut unhealthy_components: Vec<String> = components
        .iter()
        .filter_map(|(name, health)| match &health.status {
            HealthStatus::Unhealthy(msg) => Some(format!("{}: {}", name, msg)),
            _ => None,
        })
        .collect();

    if unhealthy_components.is_empty() {
        return HealthStatus::Degraded("Some components degraded".to_string());
    }

    unhealthy_components.sort();
    HealthStatus::Unhealthy(unhealthy_components.join(", "))
}
