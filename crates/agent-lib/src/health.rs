//! Pipeline component health
//!
//! Tracks the sampler, window buffer and scorer separately so a UI can tell
//! "detection unavailable" apart from "sampling failing". Sampling and
//! detection keep running on their own when the other side is down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Pipeline stages with their own health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Sampler,
    WindowBuffer,
    Scorer,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Sampler, Component::WindowBuffer, Component::Scorer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sampler => "sampler",
            Component::WindowBuffer => "window_buffer",
            Component::Scorer => "scorer",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing intermittently, the pipeline keeps going
    Degraded,
    /// Stage disabled until it recovers
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
    /// Failing reports in a row; reset by a healthy one
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            since: now,
            consecutive_failures: 0,
        }
    }

    fn transition(&mut self, status: ComponentStatus, message: Option<String>, now: DateTime<Utc>) {
        if self.status != status {
            self.since = now;
        }
        self.status = status;
        self.message = message;
        self.consecutive_failures = match status {
            ComponentStatus::Healthy => 0,
            _ => self.consecutive_failures.saturating_add(1),
        };
    }
}

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

impl HealthReport {
    /// Why detection is disabled, if it is
    pub fn detection_blocker(&self) -> Option<&str> {
        self.components
            .get(&Component::Scorer)
            .filter(|c| c.status == ComponentStatus::Unhealthy)
            .map(|c| c.message.as_deref().unwrap_or("scorer unhealthy"))
    }
}

/// Shared, cloneable health state of the pipeline
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<Component, ComponentHealth>>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy
    pub fn new() -> Self {
        let now = Utc::now();
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::healthy(now)))
            .collect();
        Self {
            components: Arc::new(RwLock::new(components)),
        }
    }

    async fn set(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        let now = Utc::now();
        let mut components = self.components.write().await;
        components
            .entry(component)
            .or_insert_with(|| ComponentHealth::healthy(now))
            .transition(status, message, now);
    }

    pub async fn mark_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn mark_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn mark_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    pub async fn report(&self) -> HealthReport {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthReport { status, components }
    }
}
