//! Time-windowed snapshot cache.
//!
//! A cached snapshot is served while it is younger than the freshness window,
//! was built for the same `(use_vision, target_app)` key, and no mutating
//! action has run since it was captured. Invalidation bumps a generation
//! counter so that a build which straddles an invalidation is never stored.

use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Named freshness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheProfile {
    Realtime,
    Responsive,
    Fast,
    #[default]
    Default,
}

impl CacheProfile {
    pub fn window(self) -> Duration {
        match self {
            CacheProfile::Realtime => Duration::from_millis(100),
            CacheProfile::Responsive => Duration::from_millis(500),
            CacheProfile::Fast => Duration::from_secs(1),
            CacheProfile::Default => Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub use_vision: bool,
    /// Lowercased target app name, `None` for the whole desktop.
    pub target_app: Option<String>,
}

impl CacheKey {
    pub fn new(use_vision: bool, target_app: Option<&str>) -> Self {
        Self {
            use_vision,
            target_app: target_app
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

struct CacheEntry {
    key: CacheKey,
    snapshot: Arc<Snapshot>,
    captured: Instant,
}

pub struct StateCache {
    freshness: Duration,
    generation: u64,
    entry: Option<CacheEntry>,
    stats: CacheStats,
}

impl StateCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            generation: 0,
            entry: None,
            stats: CacheStats::default(),
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Bumped by every [`StateCache::invalidate`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<Snapshot>> {
        let hit = self.entry.as_ref().and_then(|entry| {
            (entry.key == *key && entry.captured.elapsed() < self.freshness)
                .then(|| entry.snapshot.clone())
        });
        match hit {
            Some(snapshot) => {
                self.stats.hits += 1;
                debug!(
                    "[cache] hit (generation {}, age {:?})",
                    self.generation,
                    self.entry.as_ref().map(|e| e.captured.elapsed())
                );
                Some(snapshot)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store a snapshot built while the cache was at `built_in_generation`.
    /// Returns false (and stores nothing) if an invalidation happened meanwhile.
    pub fn store(
        &mut self,
        key: CacheKey,
        snapshot: Arc<Snapshot>,
        built_in_generation: u64,
        captured: Instant,
    ) -> bool {
        if built_in_generation != self.generation {
            debug!(
                "[cache] dropping snapshot from generation {} (now {})",
                built_in_generation, self.generation
            );
            return false;
        }
        self.entry = Some(CacheEntry {
            key,
            snapshot,
            captured,
        });
        true
    }

    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.stats.invalidations += 1;
        if self.entry.take().is_some() {
            debug!("[cache] invalidated, generation now {}", self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Rect};
    use crate::snapshot::{AppDescriptor, PerceptionSource};
    use chrono::Local;

    fn snapshot(generation: u64) -> Arc<Snapshot> {
        let screen = Rect::new(0, 0, 800, 600);
        Arc::new(Snapshot {
            generation,
            captured_at: Local::now(),
            screen,
            cursor: Point::new(0, 0),
            foreground: AppDescriptor::desktop(screen),
            background: vec![],
            interactive: vec![],
            scrollable: vec![],
            informative: vec![],
            source: PerceptionSource::Tree,
            screenshot: None,
            diagnostics: None,
            fallback_reason: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_window() {
        let mut cache = StateCache::new(CacheProfile::Responsive.window());
        let key = CacheKey::new(false, None);
        assert!(cache.store(key.clone(), snapshot(0), 0, Instant::now()));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_key_mismatch_misses() {
        let mut cache = StateCache::new(Duration::from_secs(60));
        cache.store(CacheKey::new(false, None), snapshot(0), 0, Instant::now());
        assert!(cache.get(&CacheKey::new(true, None)).is_none());
        assert!(cache.get(&CacheKey::new(false, Some("Notepad"))).is_none());
        assert!(cache.get(&CacheKey::new(false, Some("  "))).is_some());
    }

    #[test]
    fn test_stale_generation_is_not_stored() {
        let mut cache = StateCache::new(Duration::from_secs(60));
        let started_in = cache.generation();
        cache.invalidate();
        assert!(!cache.store(
            CacheKey::new(false, None),
            snapshot(started_in),
            started_in,
            Instant::now()
        ));
        assert!(cache.get(&CacheKey::new(false, None)).is_none());
    }

    #[test]
    fn test_profiles() {
        assert_eq!(CacheProfile::Realtime.window(), Duration::from_millis(100));
        assert_eq!(CacheProfile::default().window(), Duration::from_secs(2));
    }
}
