//! Per-track stats cache
//!
//! Engine counters are pulled at most once per [`STATS_CACHE_TTL`] per
//! encoding. Callers always get a copy of the cache, never the cache itself.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::engine::EncodingSource;

use super::layers::assign_simulcast_indices;
use super::metrics::{EncodingStats, TrackStats};

/// How long a snapshot is served from the cache
pub const STATS_CACHE_TTL: Duration = Duration::from_millis(200);

/// Source of the round trip time of the stream a track belongs to
pub type RttProbe = Arc<dyn Fn() -> Option<u32> + Send + Sync>;

/// An encoding whose counters feed the cache
#[derive(Clone)]
pub struct CachedEncoding {
    pub id: String,
    pub source: Arc<dyn EncodingSource>,
}

pub struct StatsCache {
    entries: Mutex<TrackStats>,
    rtt: RttProbe,
}

impl StatsCache {
    pub fn new(rtt: RttProbe) -> Self {
        Self {
            entries: Mutex::new(TrackStats::new()),
            rtt,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackStats> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stale(entries: &TrackStats, id: &str) -> bool {
        entries
            .get(id)
            .map_or(true, |stats| stats.age() > STATS_CACHE_TTL)
    }

    fn drop_removed(entries: &mut TrackStats, encodings: &[CachedEncoding]) -> bool {
        let before = entries.len();
        entries.retain(|id, _| encodings.iter().any(|e| &e.id == id));
        entries.len() != before
    }

    /// Refresh stale encodings synchronously and return the ranked snapshot
    pub fn get(&self, encodings: &[CachedEncoding]) -> TrackStats {
        let mut entries = self.lock();
        let mut refreshed = Self::drop_removed(&mut entries, encodings);
        for encoding in encodings {
            if Self::is_stale(&entries, &encoding.id) {
                let counters = encoding.source.update();
                let stats = EncodingStats::from_counters(&counters, (self.rtt)());
                entries.insert(encoding.id.clone(), stats);
                refreshed = true;
            }
        }

        if refreshed {
            assign_simulcast_indices(&mut entries);
        }
        entries.clone()
    }

    /// Like [`StatsCache::get`], awaiting one engine round trip per stale encoding
    pub async fn get_async(&self, encodings: &[CachedEncoding]) -> TrackStats {
        let stale: Vec<CachedEncoding> = {
            let entries = self.lock();
            encodings
                .iter()
                .filter(|e| Self::is_stale(&entries, &e.id))
                .cloned()
                .collect()
        };

        let mut fresh = Vec::with_capacity(stale.len());
        for encoding in stale {
            let counters = encoding.source.update_async().await;
            fresh.push((encoding.id, counters));
        }

        let mut entries = self.lock();
        let mut refreshed = Self::drop_removed(&mut entries, encodings);
        refreshed |= !fresh.is_empty();
        for (id, counters) in fresh {
            entries.insert(id, EncodingStats::from_counters(&counters, (self.rtt)()));
        }

        if refreshed {
            assign_simulcast_indices(&mut entries);
        }
        entries.clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EncodingCounters;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct FakeSource {
        bitrate: AtomicU64,
        updates: AtomicUsize,
    }

    impl FakeSource {
        fn new(bitrate: u64) -> Arc<Self> {
            Arc::new(Self {
                bitrate: AtomicU64::new(bitrate),
                updates: AtomicUsize::new(0),
            })
        }
    }

    impl EncodingSource for FakeSource {
        fn update(&self) -> EncodingCounters {
            self.updates.fetch_add(1, Ordering::SeqCst);
            EncodingCounters {
                bitrate: self.bitrate.load(Ordering::SeqCst),
                ..Default::default()
            }
        }
    }

    fn cached(id: &str, source: &Arc<FakeSource>) -> CachedEncoding {
        CachedEncoding {
            id: id.to_string(),
            source: source.clone(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_within_ttl() {
        let source = FakeSource::new(1_000);
        let cache = StatsCache::new(Arc::new(|| Some(20)));
        let encodings = vec![cached("", &source)];

        let first = cache.get(&encodings);
        source.bitrate.store(5_000, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(150)).await;
        let second = cache.get(&encodings);

        assert_eq!(first, second);
        assert_eq!(source.updates.load(Ordering::SeqCst), 1);
        assert_eq!(second[""].rtt, Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_ttl() {
        let source = FakeSource::new(1_000);
        let cache = StatsCache::new(Arc::new(|| None));
        let encodings = vec![cached("", &source)];

        cache.get(&encodings);
        source.bitrate.store(5_000, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(250)).await;
        let stats = cache.get(&encodings);

        assert_eq!(stats[""].bitrate, 5_000);
        assert_eq!(source.updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ranking_stable_across_refresh() {
        let high = FakeSource::new(2_000_000);
        let low = FakeSource::new(300_000);
        let cache = StatsCache::new(Arc::new(|| None));
        let encodings = vec![cached("h", &high), cached("l", &low)];

        let first = cache.get(&encodings);
        tokio::time::advance(Duration::from_millis(400)).await;
        let second = cache.get(&encodings);

        assert_eq!(first["h"].simulcast_idx, 0);
        assert_eq!(second["h"].simulcast_idx, 0);
        assert_eq!(second["l"].simulcast_idx, 1);
    }

    #[tokio::test]
    async fn test_returned_copy_is_detached_from_cache() {
        let source = FakeSource::new(1_000);
        let cache = StatsCache::new(Arc::new(|| None));
        let encodings = vec![cached("", &source)];

        let mut copy = cache.get(&encodings);
        copy.get_mut("").unwrap().bitrate = 0;
        copy.clear();

        assert_eq!(cache.get(&encodings)[""].bitrate, 1_000);
    }

    #[tokio::test]
    async fn test_async_refresh() {
        let source = FakeSource::new(64_000);
        let cache = StatsCache::new(Arc::new(|| None));
        let encodings = vec![cached("", &source)];

        let stats = cache.get_async(&encodings).await;
        assert_eq!(stats[""].bitrate, 64_000);
        assert_eq!(stats[""].simulcast_idx, 0);

        cache.get_async(&encodings).await;
        assert_eq!(source.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removed_encodings_are_dropped() {
        let a = FakeSource::new(1_000);
        let b = FakeSource::new(2_000);
        let cache = StatsCache::new(Arc::new(|| None));

        cache.get(&[cached("a", &a), cached("b", &b)]);
        let stats = cache.get(&[cached("a", &a)]);

        assert_eq!(stats.len(), 1);
        assert_eq!(stats["a"].simulcast_idx, 0);
    }
}
