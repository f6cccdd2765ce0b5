use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Starting,
    Running,
    Restarting,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopHealth {
    pub status: LoopStatus,
    pub restarts: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl Default for LoopHealth {
    fn default() -> Self {
        Self {
            status: LoopStatus::Starting,
            restarts: 0,
            last_error: None,
            last_error_at: None,
        }
    }
}

/// Per-loop health shared between the supervisor and the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    loops: Arc<RwLock<BTreeMap<String, LoopHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.loops
            .write()
            .await
            .entry(name.to_string())
            .or_default();
    }

    pub async fn set_status(&self, name: &str, status: LoopStatus) {
        let mut loops = self.loops.write().await;
        loops.entry(name.to_string()).or_default().status = status;
    }

    /// Record a failed run; the loop is considered restarting until it reports
    /// running again.
    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        let mut loops = self.loops.write().await;
        let health = loops.entry(name.to_string()).or_default();
        health.status = LoopStatus::Restarting;
        health.restarts += 1;
        health.last_error = Some(error.into());
        health.last_error_at = Some(Utc::now());
    }

    pub async fn get(&self, name: &str) -> Option<LoopHealth> {
        self.loops.read().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, LoopHealth> {
        self.loops.read().await.clone()
    }

    /// True when at least one loop is registered and every loop is running.
    pub async fn is_healthy(&self) -> bool {
        let loops = self.loops.read().await;
        !loops.is_empty() && loops.values().all(|h| h.status == LoopStatus::Running)
    }
}
