//! Attempt registry

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::trace;

use super::RegistryError;

/// One execution try of a task
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Attempt id (the first attempt reuses the task id)
    pub id: String,

    /// Task that owns this attempt
    pub task_id: String,

    /// Attempt number (1-based)
    pub number: u32,

    /// Opaque metadata
    pub info: serde_json::Value,

    /// Last liveness signal; never moves backwards
    pub last_heartbeat: Instant,
}

impl Attempt {
    /// Create an attempt whose heartbeat starts now
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        number: u32,
        info: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            number,
            info,
            last_heartbeat: Instant::now(),
        }
    }
}

/// Registry of attempts keyed by attempt id
pub struct AttemptRegistry {
    attempts: RwLock<HashMap<String, Attempt>>,
}

impl AttemptRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite an attempt, returning the previous entry
    pub fn add(&self, attempt: Attempt) -> Option<Attempt> {
        self.attempts.write().insert(attempt.id.clone(), attempt)
    }

    /// Get a snapshot of an attempt
    pub fn get(&self, id: &str) -> Result<Attempt, RegistryError> {
        self.attempts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::AttemptNotFound(id.to_string()))
    }

    /// Refresh an attempt's heartbeat to now
    pub fn update_heartbeat(&self, id: &str) -> Result<Instant, RegistryError> {
        let mut attempts = self.attempts.write();
        let attempt = attempts
            .get_mut(id)
            .ok_or_else(|| RegistryError::AttemptNotFound(id.to_string()))?;
        attempt.last_heartbeat = attempt.last_heartbeat.max(Instant::now());
        trace!(attempt_id = %id, "heartbeat refreshed");
        Ok(attempt.last_heartbeat)
    }

    /// Remove an attempt
    pub fn remove(&self, id: &str) -> Option<Attempt> {
        self.attempts.write().remove(id)
    }

    /// Remove several attempts, returning how many existed
    pub fn remove_all<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut attempts = self.attempts.write();
        ids.into_iter()
            .filter(|id| attempts.remove(id.as_ref()).is_some())
            .count()
    }

    /// Number of attempts
    pub fn len(&self) -> usize {
        self.attempts.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.attempts.read().is_empty()
    }
}

impl Default for AttemptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
