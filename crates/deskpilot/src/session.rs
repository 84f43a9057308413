//! A desktop session: one accessibility engine, one snapshot cache, one lease.
//!
//! Runs sharing a session are serialized through a FIFO lease, so a second
//! run's first perception waits until the first run is terminal. Cache
//! invalidations are visible to every run on the session.

use crate::cache::{CacheStats, StateCache};
use crate::config::PilotConfig;
use crate::platforms::AccessibilityEngine;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

pub struct Session {
    id: Uuid,
    engine: Arc<dyn AccessibilityEngine>,
    config: Arc<PilotConfig>,
    cache: Mutex<StateCache>,
    // tokio's mutex queues waiters in FIFO order.
    lease: Arc<AsyncMutex<()>>,
    perception_retries: AtomicU64,
}

/// Exclusive use of a session. Released on drop.
pub struct SessionLease {
    _guard: OwnedMutexGuard<()>,
    session_id: Uuid,
    holder: Uuid,
    acquired_at: DateTime<Local>,
}

impl SessionLease {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run that holds the lease.
    pub fn holder(&self) -> Uuid {
        self.holder
    }

    pub fn acquired_at(&self) -> DateTime<Local> {
        self.acquired_at
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        debug!(
            "[session] {} released by run {}",
            self.session_id, self.holder
        );
    }
}

impl Session {
    pub fn new(engine: Arc<dyn AccessibilityEngine>, config: Arc<PilotConfig>) -> Arc<Self> {
        let freshness = config.cache.freshness();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            engine,
            config,
            cache: Mutex::new(StateCache::new(freshness)),
            lease: Arc::new(AsyncMutex::new(())),
            perception_retries: AtomicU64::new(0),
        });
        info!(
            "[session] {} created on '{}' backend (cache window {:?})",
            session.id,
            session.engine.name(),
            freshness
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &Arc<dyn AccessibilityEngine> {
        &self.engine
    }

    pub fn config(&self) -> &Arc<PilotConfig> {
        &self.config
    }

    /// Wait for exclusive use of the session. Waiters are served in arrival order.
    pub async fn acquire(&self, holder: Uuid) -> SessionLease {
        debug!("[session] run {} waiting for {}", holder, self.id);
        let guard = self.lease.clone().lock_owned().await;
        debug!("[session] run {} acquired {}", holder, self.id);
        SessionLease {
            _guard: guard,
            session_id: self.id,
            holder,
            acquired_at: Local::now(),
        }
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, StateCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the cached snapshot; the next `get_state` rebuilds.
    pub fn invalidate(&self) {
        self.cache().invalidate();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    /// How many post-launch perception retries this session has performed.
    pub fn perception_retries(&self) -> u64 {
        self.perception_retries.load(Ordering::Relaxed)
    }

    pub(crate) fn record_perception_retry(&self) {
        self.perception_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Run a blocking engine call on the blocking pool.
    pub(crate) async fn with_engine<T, F>(&self, f: F) -> Result<T, tokio::task::JoinError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AccessibilityEngine) -> T + Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || f(engine.as_ref())).await
    }
}
