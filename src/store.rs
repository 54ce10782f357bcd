//! Task persistence: a TTL'd key/value store backed by Redis with a
//! one-way in-process fallback.
//!
//! Every record lives under the `task:` key prefix. On the first remote
//! error the adapter degrades to a mutex-guarded map and stays there for
//! the life of the process, so a task only ever has one writer view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::model::Task;

const KEY_PREFIX: &str = "task:";

struct FallbackEntry {
    payload: String,
    expires_at: Instant,
}

/// Durable task store with transparent degradation.
pub struct TaskStore {
    pool: Option<Pool<RedisConnectionManager>>,
    fallback: Mutex<HashMap<String, FallbackEntry>>,
    degraded: AtomicBool,
    fallback_enabled: bool,
    ttl: Duration,
}

impl TaskStore {
    /// Connect to the remote store. Connection failures are not fatal:
    /// the store starts degraded and serves from the in-process map.
    pub async fn connect(url: &str, ttl: Duration) -> Self {
        if url.is_empty() {
            info!("No store URL configured; using in-process task storage");
            return Self::in_memory(ttl);
        }

        match RedisConnectionManager::new(url) {
            Ok(manager) => match Pool::builder().max_size(10).build(manager).await {
                Ok(pool) => {
                    // Probe the connection once so a dead endpoint degrades
                    // at startup instead of on the first task write.
                    let probe = pool.get().await;
                    let connected = probe.is_ok();
                    if let Err(e) = &probe {
                        warn!("Task store unreachable ({}); degrading to in-process storage", e);
                    }
                    drop(probe);
                    if connected {
                        info!("Connected to task store at {}", url);
                        Self::with_pool(Some(pool), ttl)
                    } else {
                        Self::in_memory(ttl)
                    }
                }
                Err(e) => {
                    warn!("Failed to build store pool ({}); degrading to in-process storage", e);
                    Self::in_memory(ttl)
                }
            },
            Err(e) => {
                warn!("Invalid store URL ({}); degrading to in-process storage", e);
                Self::in_memory(ttl)
            }
        }
    }

    /// Fallback-only store, used when no remote endpoint is configured
    /// and in tests.
    pub fn in_memory(ttl: Duration) -> Self {
        let store = Self::with_pool(None, ttl);
        store.degraded.store(true, Ordering::SeqCst);
        store
    }

    /// Disable the in-process fallback; remote errors then surface as
    /// `Unavailable` instead of degrading.
    pub fn without_fallback(mut self) -> Self {
        self.fallback_enabled = false;
        self
    }

    fn with_pool(pool: Option<Pool<RedisConnectionManager>>, ttl: Duration) -> Self {
        Self {
            pool,
            fallback: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            fallback_enabled: true,
            ttl,
        }
    }

    fn key(task_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, task_id)
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst) || self.pool.is_none()
    }

    /// One-way transition to the fallback map; logged once.
    fn degrade(&self, context: &str, err: impl std::fmt::Display) -> Result<()> {
        if !self.fallback_enabled {
            return Err(OrchestratorError::unavailable(format!(
                "task store unavailable during {}: {}",
                context, err
            )));
        }
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "Task store error during {} ({}); degrading to in-process storage",
                context, err
            );
        }
        Ok(())
    }

    fn serialize(task: &Task) -> Result<String> {
        serde_json::to_string(task)
            .map_err(|e| OrchestratorError::Serialization(e.to_string()))
    }

    fn deserialize(payload: &str) -> Result<Task> {
        serde_json::from_str(payload)
            .map_err(|e| OrchestratorError::Serialization(e.to_string()))
    }

    fn fallback_put(&self, task_id: &str, payload: String) {
        let mut map = self.fallback.lock().expect("fallback lock poisoned");
        map.insert(
            task_id.to_string(),
            FallbackEntry {
                payload,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn fallback_get(&self, task_id: &str) -> Option<String> {
        let mut map = self.fallback.lock().expect("fallback lock poisoned");
        match map.get(task_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.payload.clone()),
            Some(_) => {
                map.remove(task_id);
                None
            }
            None => None,
        }
    }

    /// Atomic replace of a task record.
    pub async fn put(&self, task: &Task) -> Result<()> {
        let payload = Self::serialize(task)?;

        if !self.is_degraded() {
            if let Some(pool) = &self.pool {
                let result: std::result::Result<(), _> = async {
                    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                    conn.set_ex::<_, _, ()>(Self::key(&task.task_id), &payload, self.ttl.as_secs())
                        .await
                        .map_err(|e| e.to_string())
                }
                .await;

                match result {
                    Ok(()) => {
                        debug!("Stored task {}", task.task_id);
                        return Ok(());
                    }
                    Err(e) => self.degrade("put", e)?,
                }
            }
        }

        self.fallback_put(&task.task_id, payload);
        Ok(())
    }

    /// Conditional create; fails with `AlreadyExists` when the id is live.
    pub async fn put_if_absent(&self, task: &Task) -> Result<()> {
        let payload = Self::serialize(task)?;

        if !self.is_degraded() {
            if let Some(pool) = &self.pool {
                let result: std::result::Result<Option<String>, _> = async {
                    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                    redis::cmd("SET")
                        .arg(Self::key(&task.task_id))
                        .arg(&payload)
                        .arg("NX")
                        .arg("EX")
                        .arg(self.ttl.as_secs())
                        .query_async(&mut *conn)
                        .await
                        .map_err(|e: redis::RedisError| e.to_string())
                }
                .await;

                match result {
                    Ok(Some(_)) => return Ok(()),
                    Ok(None) => {
                        return Err(OrchestratorError::AlreadyExists(task.task_id.clone()))
                    }
                    Err(e) => self.degrade("put_if_absent", e)?,
                }
            }
        }

        if self.fallback_get(&task.task_id).is_some() {
            return Err(OrchestratorError::AlreadyExists(task.task_id.clone()));
        }
        self.fallback_put(&task.task_id, payload);
        Ok(())
    }

    /// Fetch a task; None when absent or expired.
    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        if !self.is_degraded() {
            if let Some(pool) = &self.pool {
                let result: std::result::Result<Option<String>, _> = async {
                    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                    conn.get::<_, Option<String>>(Self::key(task_id))
                        .await
                        .map_err(|e| e.to_string())
                }
                .await;

                match result {
                    Ok(Some(payload)) => return Ok(Some(Self::deserialize(&payload)?)),
                    Ok(None) => return Ok(None),
                    Err(e) => self.degrade("get", e)?,
                }
            }
        }

        match self.fallback_get(task_id) {
            Some(payload) => Ok(Some(Self::deserialize(&payload)?)),
            None => Ok(None),
        }
    }

    /// All live tasks, scanning the `task:` key prefix.
    pub async fn list(&self) -> Result<Vec<Task>> {
        if !self.is_degraded() {
            if let Some(pool) = &self.pool {
                let result: std::result::Result<Vec<String>, String> = async {
                    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                    let mut payloads = Vec::new();
                    let mut cursor: u64 = 0;
                    loop {
                        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(format!("{}*", KEY_PREFIX))
                            .arg("COUNT")
                            .arg(100)
                            .query_async(&mut *conn)
                            .await
                            .map_err(|e: redis::RedisError| e.to_string())?;
                        for key in keys {
                            if let Some(payload) = conn
                                .get::<_, Option<String>>(&key)
                                .await
                                .map_err(|e| e.to_string())?
                            {
                                payloads.push(payload);
                            }
                        }
                        cursor = next;
                        if cursor == 0 {
                            break;
                        }
                    }
                    Ok(payloads)
                }
                .await;

                match result {
                    Ok(payloads) => {
                        let mut tasks = Vec::with_capacity(payloads.len());
                        for payload in payloads {
                            tasks.push(Self::deserialize(&payload)?);
                        }
                        return Ok(tasks);
                    }
                    Err(e) => self.degrade("list", e)?,
                }
            }
        }

        let now = Instant::now();
        let mut map = self.fallback.lock().expect("fallback lock poisoned");
        map.retain(|_, entry| entry.expires_at > now);
        let mut tasks = Vec::with_capacity(map.len());
        for entry in map.values() {
            tasks.push(Self::deserialize(&entry.payload)?);
        }
        Ok(tasks)
    }

    pub async fn delete(&self, task_id: &str) -> Result<()> {
        if !self.is_degraded() {
            if let Some(pool) = &self.pool {
                let result: std::result::Result<(), _> = async {
                    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                    conn.del::<_, ()>(Self::key(task_id))
                        .await
                        .map_err(|e| e.to_string())
                }
                .await;

                match result {
                    Ok(()) => return Ok(()),
                    Err(e) => self.degrade("delete", e)?,
                }
            }
        }

        self.fallback.lock().expect("fallback lock poisoned").remove(task_id);
        Ok(())
    }

    /// Service status string for the health endpoint.
    pub fn health(&self) -> &'static str {
        if self.is_degraded() {
            "not_available"
        } else {
            "connected"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;

    fn store() -> TaskStore {
        TaskStore::in_memory(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = store();
        let task = Task::new("t1".into(), serde_json::json!({}));
        store.put(&task).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.task_id, "t1");
        assert_eq!(loaded.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = store();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_if_absent_rejects_duplicates() {
        let store = store();
        let task = Task::new("dup".into(), serde_json::json!({}));
        store.put_if_absent(&task).await.unwrap();

        let err = store.put_if_absent(&task).await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test]
    async fn list_returns_live_tasks() {
        let store = store();
        for id in ["a", "b", "c"] {
            store
                .put(&Task::new(id.into(), serde_json::json!({})))
                .await
                .unwrap();
        }
        let tasks = store.list().await.unwrap();
        assert_eq!(tasks.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_task() {
        let store = store();
        store
            .put(&Task::new("gone".into(), serde_json::json!({})))
            .await
            .unwrap();
        store.delete("gone").await.unwrap();
        assert!(store.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        let store = TaskStore::in_memory(Duration::from_millis(10));
        store
            .put(&Task::new("short".into(), serde_json::json!({})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_reports_not_available() {
        assert_eq!(store().health(), "not_available");
    }
}
