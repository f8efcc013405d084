//! Incoming track bridge
//!
//! One media kind of an incoming stream bridge. Owns the encodings fed by the
//! engine, counts how many outgoing tracks consume it and serves cached
//! stats.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::{MediaKind, MediaSource};
use crate::event::Emitter;
use crate::stats::{active_layers, ActiveLayers, CachedEncoding, RttProbe, StatsCache, TrackStats};

/// Events raised by an [`IncomingStreamTrackBridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingTrackEvent {
    /// The first consumer attached
    Attached,
    /// The last consumer detached
    Detached,
    /// Mute state changed
    Muted(bool),
    Stopped,
}

/// One simulcast encoding of an incoming track
#[derive(Clone)]
pub struct Encoding {
    /// Empty for the default encoding
    pub id: String,
    pub source: Arc<dyn MediaSource>,
}

impl std::fmt::Debug for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoding").field("id", &self.id).finish()
    }
}

struct TrackState {
    /// Insertion order; the first one is the default encoding
    encodings: Vec<Encoding>,
    attach_count: usize,
    muted: bool,
    stopped: bool,
}

pub struct IncomingStreamTrackBridge {
    id: String,
    media: MediaKind,
    state: Mutex<TrackState>,
    stats: StatsCache,
    events: Emitter<IncomingTrackEvent>,
}

impl IncomingStreamTrackBridge {
    /// Create a track fed by a single default encoding
    pub fn new(
        id: impl Into<String>,
        media: MediaKind,
        source: Arc<dyn MediaSource>,
        rtt: RttProbe,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            media,
            state: Mutex::new(TrackState {
                encodings: vec![Encoding {
                    id: String::new(),
                    source,
                }],
                attach_count: 0,
                muted: false,
                stopped: false,
            }),
            stats: StatsCache::new(rtt),
            events: Emitter::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn events(&self) -> &Emitter<IncomingTrackEvent> {
        &self.events
    }

    pub fn encodings(&self) -> Vec<Encoding> {
        self.lock().encodings.clone()
    }

    pub fn encoding(&self, id: &str) -> Option<Encoding> {
        self.lock().encodings.iter().find(|e| e.id == id).cloned()
    }

    pub fn default_encoding(&self) -> Option<Encoding> {
        self.lock().encodings.first().cloned()
    }

    /// Media source consumers register on
    pub(crate) fn media_source(&self) -> Option<Arc<dyn MediaSource>> {
        self.default_encoding().map(|e| e.source)
    }

    fn cached_encodings(&self) -> Vec<CachedEncoding> {
        self.lock()
            .encodings
            .iter()
            .map(|e| CachedEncoding {
                id: e.id.clone(),
                source: e.source.clone(),
            })
            .collect()
    }

    /// Stats per encoding, refreshed at most every 200ms
    pub fn stats(&self) -> TrackStats {
        self.stats.get(&self.cached_encodings())
    }

    pub async fn stats_async(&self) -> TrackStats {
        self.stats.get_async(&self.cached_encodings()).await
    }

    /// Active and inactive encodings with their layers, highest bitrate first
    pub fn active_layers(&self) -> ActiveLayers {
        active_layers(&self.stats())
    }

    /// Register a consumer
    pub fn attached(&self) {
        let first = {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.attach_count += 1;
            state.attach_count == 1
        };
        if first {
            tracing::debug!(track = %self.id, "Incoming track attached");
            self.events.emit(IncomingTrackEvent::Attached);
        }
    }

    /// Unregister a consumer
    pub fn detached(&self) {
        let last = {
            let mut state = self.lock();
            if state.stopped || state.attach_count == 0 {
                return;
            }
            state.attach_count -= 1;
            state.attach_count == 0
        };
        if last {
            tracing::debug!(track = %self.id, "Incoming track detached");
            self.events.emit(IncomingTrackEvent::Detached);
        }
    }

    /// Number of consumers currently attached
    pub fn attach_count(&self) -> usize {
        self.lock().attach_count
    }

    pub fn is_attached(&self) -> bool {
        self.attach_count() > 0
    }

    /// Forward a target bitrate (kbps) to every encoding
    pub fn set_target_bitrate_hint(&self, kbps: u32) {
        for encoding in self.encodings() {
            encoding.source.set_target_bitrate_hint(kbps);
        }
    }

    /// Stop (or resume) forwarding media to consumers
    pub fn mute(&self, muted: bool) {
        let encodings = {
            let mut state = self.lock();
            if state.stopped || state.muted == muted {
                return;
            }
            state.muted = muted;
            state.encodings.clone()
        };
        for encoding in encodings {
            encoding.source.mute(muted);
        }
        self.events.emit(IncomingTrackEvent::Muted(muted));
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn stop(&self) {
        {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.encodings.clear();
        }

        tracing::debug!(track = %self.id, media = %self.media, "Incoming track stopped");
        self.events.emit(IncomingTrackEvent::Stopped);
        self.events.close();
        self.stats.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::{EncodingCounters, EncodingSource, MediaFrameListener};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub bitrate: AtomicU64,
        pub hint: AtomicU32,
        pub muted: AtomicBool,
        pub listeners: Mutex<Vec<Arc<dyn MediaFrameListener>>>,
    }

    impl EncodingSource for FakeSource {
        fn update(&self) -> EncodingCounters {
            EncodingCounters {
                bitrate: self.bitrate.load(Ordering::SeqCst),
                ..Default::default()
            }
        }
    }

    impl MediaSource for FakeSource {
        fn add_media_listener(&self, listener: Arc<dyn MediaFrameListener>) {
            self.listeners.lock().unwrap().push(listener);
        }

        fn remove_media_listener(&self, listener: &Arc<dyn MediaFrameListener>) {
            self.listeners
                .lock()
                .unwrap()
                .retain(|l| !Arc::ptr_eq(l, listener));
        }

        fn set_target_bitrate_hint(&self, kbps: u32) {
            self.hint.store(kbps, Ordering::SeqCst);
        }

        fn mute(&self, muted: bool) {
            self.muted.store(muted, Ordering::SeqCst);
        }
    }

    pub(crate) fn track(media: MediaKind) -> (Arc<IncomingStreamTrackBridge>, Arc<FakeSource>) {
        let source = Arc::new(FakeSource::default());
        let track =
            IncomingStreamTrackBridge::new(media.as_str(), media, source.clone(), Arc::new(|| None));
        (track, source)
    }

    fn record(track: &IncomingStreamTrackBridge) -> Arc<Mutex<Vec<IncomingTrackEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        track.events().on(move |e| sink.lock().unwrap().push(*e));
        seen
    }

    #[test]
    fn test_attach_counter_edges() {
        let (track, _) = track(MediaKind::Video);
        let seen = record(&track);

        track.attached();
        track.attached();
        track.detached();
        assert!(track.is_attached());
        track.detached();
        track.detached();

        assert!(!track.is_attached());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![IncomingTrackEvent::Attached, IncomingTrackEvent::Detached]
        );
    }

    #[test]
    fn test_default_encoding() {
        let (track, _) = track(MediaKind::Audio);

        assert_eq!(track.encodings().len(), 1);
        assert_eq!(track.default_encoding().unwrap().id, "");
        assert!(track.encoding("").is_some());
        assert!(track.encoding("r1").is_none());
    }

    #[test]
    fn test_hint_and_mute_reach_source() {
        let (track, source) = track(MediaKind::Video);
        let seen = record(&track);

        track.set_target_bitrate_hint(1500);
        track.mute(true);
        track.mute(true);

        assert_eq!(source.hint.load(Ordering::SeqCst), 1500);
        assert!(source.muted.load(Ordering::SeqCst));
        assert!(track.is_muted());
        assert_eq!(*seen.lock().unwrap(), vec![IncomingTrackEvent::Muted(true)]);
    }

    #[tokio::test]
    async fn test_stats_and_layers() {
        let (track, source) = track(MediaKind::Video);
        source.bitrate.store(800_000, Ordering::SeqCst);

        let stats = track.stats();
        assert_eq!(stats[""].bitrate, 800_000);
        assert_eq!(stats[""].simulcast_idx, 0);

        let layers = track.active_layers();
        assert_eq!(layers.active.len(), 1);
        assert!(layers.inactive.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (track, _) = track(MediaKind::Audio);
        let seen = record(&track);

        track.stop();
        track.stop();
        track.attached();

        assert!(track.is_stopped());
        assert!(track.encodings().is_empty());
        assert!(!track.is_attached());
        assert_eq!(*seen.lock().unwrap(), vec![IncomingTrackEvent::Stopped]);
    }
}
