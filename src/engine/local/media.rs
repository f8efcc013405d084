//! Media plumbing of the in-process engine

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::engine::{
    EncodingCounters, EncodingSource, IncomingBridgeHandle, MediaFrame, MediaFrameListener,
    MediaKind, MediaSource, OutgoingBridgeHandle,
};

use super::client::LocalClientConnection;
use super::JobQueue;

const RATE_WINDOW: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A frame seen within the rate window
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    at: Instant,
    len: usize,
    keyframe: bool,
}

/// Frame counters of one encoding
#[derive(Debug, Default)]
struct FrameCounters {
    frames: u64,
    keyframes: u64,
    bytes: u64,
    window: VecDeque<WindowEntry>,
}

impl FrameCounters {
    fn record(&mut self, frame: &MediaFrame) {
        let now = Instant::now();
        self.frames += 1;
        self.bytes += frame.data.len() as u64;
        if frame.is_keyframe {
            self.keyframes += 1;
        }
        self.window.push_back(WindowEntry {
            at: now,
            len: frame.data.len(),
            keyframe: frame.is_keyframe,
        });
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(entry) = self.window.front() {
            if now.duration_since(entry.at) > RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Totals since start, deltas and bitrate over the last second
    fn snapshot(&mut self, kind: MediaKind) -> EncodingCounters {
        self.prune(Instant::now());
        let bitrate = self.window.iter().map(|e| e.len as u64).sum::<u64>() * 8;
        let frames_delta = self.window.len() as u64;
        let keyframes_delta = self.window.iter().filter(|e| e.keyframe).count() as u64;

        let mut counters = EncodingCounters {
            num_packets: self.frames,
            num_packets_delta: frames_delta,
            num_frames: self.frames,
            num_frames_delta: frames_delta,
            total_bytes: self.bytes,
            bitrate,
            ..Default::default()
        };
        if kind == MediaKind::Video {
            counters.iframes = self.keyframes;
            counters.iframes_delta = keyframes_delta;
            counters.pframes = self.frames - self.keyframes;
            counters.pframes_delta = frames_delta - keyframes_delta;
        }
        counters
    }
}

/// Counters of one media kind, readable from any thread or through the engine queue
pub(crate) struct LocalCounters {
    kind: MediaKind,
    counters: Arc<Mutex<FrameCounters>>,
    target_bitrate: AtomicU64,
    jobs: JobQueue,
}

impl LocalCounters {
    fn new(kind: MediaKind, jobs: JobQueue) -> Self {
        Self {
            kind,
            counters: Arc::new(Mutex::new(FrameCounters::default())),
            target_bitrate: AtomicU64::new(0),
            jobs,
        }
    }

    fn record(&self, frame: &MediaFrame) {
        lock(&self.counters).record(frame);
    }

    fn with_target(&self, mut counters: EncodingCounters) -> EncodingCounters {
        let target = self.target_bitrate.load(Ordering::Relaxed);
        counters.target_bitrate = (target > 0).then_some(target);
        counters
    }
}

#[async_trait]
impl EncodingSource for LocalCounters {
    fn update(&self) -> EncodingCounters {
        let counters = lock(&self.counters).snapshot(self.kind);
        self.with_target(counters)
    }

    async fn update_async(&self) -> EncodingCounters {
        let (tx, rx) = oneshot::channel();
        let counters = self.counters.clone();
        let kind = self.kind;
        self.jobs.post(move || {
            let _ = tx.send(lock(&counters).snapshot(kind));
        });
        match rx.await {
            Ok(counters) => self.with_target(counters),
            Err(_) => self.update(),
        }
    }
}

/// Set of frame consumers
#[derive(Default)]
pub(crate) struct MediaListeners {
    listeners: Mutex<Vec<Arc<dyn MediaFrameListener>>>,
}

impl MediaListeners {
    pub(crate) fn add(&self, listener: Arc<dyn MediaFrameListener>) {
        lock(&self.listeners).push(listener);
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn MediaFrameListener>) {
        lock(&self.listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn clear(&self) {
        lock(&self.listeners).clear();
    }

    pub(crate) fn deliver(&self, frame: &MediaFrame) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_media_frame(frame);
        }
    }
}

/// One media kind coming out of an incoming bridge
pub(crate) struct LocalMediaSource {
    counters: LocalCounters,
    listeners: MediaListeners,
    muted: AtomicBool,
}

impl LocalMediaSource {
    fn new(kind: MediaKind, jobs: JobQueue) -> Self {
        Self {
            counters: LocalCounters::new(kind, jobs),
            listeners: MediaListeners::default(),
            muted: AtomicBool::new(false),
        }
    }

    fn push(&self, frame: &MediaFrame) {
        self.counters.record(frame);
        if !self.muted.load(Ordering::Acquire) {
            self.listeners.deliver(frame);
        }
    }
}

#[async_trait]
impl EncodingSource for LocalMediaSource {
    fn update(&self) -> EncodingCounters {
        self.counters.update()
    }

    async fn update_async(&self) -> EncodingCounters {
        self.counters.update_async().await
    }
}

impl MediaSource for LocalMediaSource {
    fn add_media_listener(&self, listener: Arc<dyn MediaFrameListener>) {
        self.listeners.add(listener);
    }

    fn remove_media_listener(&self, listener: &Arc<dyn MediaFrameListener>) {
        self.listeners.remove(listener);
    }

    fn set_target_bitrate_hint(&self, kbps: u32) {
        self.counters
            .target_bitrate
            .store(u64::from(kbps) * 1000, Ordering::Relaxed);
    }

    fn mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }
}

/// Splits a net-stream's frames by kind
struct IncomingRouter {
    audio: Arc<LocalMediaSource>,
    video: Arc<LocalMediaSource>,
    stopped: AtomicBool,
}

impl MediaFrameListener for IncomingRouter {
    fn on_media_frame(&self, frame: &MediaFrame) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        match frame.kind {
            MediaKind::Audio => self.audio.push(frame),
            MediaKind::Video => self.video.push(frame),
        }
    }
}

pub(crate) struct LocalIncomingBridge {
    router: Arc<IncomingRouter>,
    max_late_offset: u32,
    max_buffering_time: u32,
}

impl LocalIncomingBridge {
    pub(crate) fn new(max_late_offset: u32, max_buffering_time: u32, jobs: JobQueue) -> Self {
        Self {
            router: Arc::new(IncomingRouter {
                audio: Arc::new(LocalMediaSource::new(MediaKind::Audio, jobs.clone())),
                video: Arc::new(LocalMediaSource::new(MediaKind::Video, jobs)),
                stopped: AtomicBool::new(false),
            }),
            max_late_offset,
            max_buffering_time,
        }
    }
}

impl IncomingBridgeHandle for LocalIncomingBridge {
    fn frame_listener(&self) -> Arc<dyn MediaFrameListener> {
        self.router.clone()
    }

    fn source(&self, kind: MediaKind) -> Arc<dyn MediaSource> {
        match kind {
            MediaKind::Audio => self.router.audio.clone(),
            MediaKind::Video => self.router.video.clone(),
        }
    }

    fn stop(&self) {
        if !self.router.stopped.swap(true, Ordering::AcqRel) {
            tracing::trace!(
                max_late_offset = self.max_late_offset,
                max_buffering_time = self.max_buffering_time,
                "Incoming bridge released"
            );
            self.router.audio.listeners.clear();
            self.router.video.listeners.clear();
        }
    }
}

/// Counts outgoing frames and hands them to the client connection
struct OutgoingSink {
    stream_id: u32,
    client: Weak<LocalClientConnection>,
    audio: Arc<LocalCounters>,
    video: Arc<LocalCounters>,
    stopped: AtomicBool,
}

impl MediaFrameListener for OutgoingSink {
    fn on_media_frame(&self, frame: &MediaFrame) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        match frame.kind {
            MediaKind::Audio => self.audio.record(frame),
            MediaKind::Video => self.video.record(frame),
        }
        if let Some(client) = self.client.upgrade() {
            client.send_media(self.stream_id, frame.clone());
        }
    }
}

pub(crate) struct LocalOutgoingBridge {
    sink: Arc<OutgoingSink>,
}

impl LocalOutgoingBridge {
    pub(crate) fn new(stream_id: u32, client: Weak<LocalClientConnection>, jobs: JobQueue) -> Self {
        Self {
            sink: Arc::new(OutgoingSink {
                stream_id,
                client,
                audio: Arc::new(LocalCounters::new(MediaKind::Audio, jobs.clone())),
                video: Arc::new(LocalCounters::new(MediaKind::Video, jobs)),
                stopped: AtomicBool::new(false),
            }),
        }
    }
}

impl OutgoingBridgeHandle for LocalOutgoingBridge {
    fn frame_listener(&self) -> Arc<dyn MediaFrameListener> {
        self.sink.clone()
    }

    fn counters(&self, kind: MediaKind) -> Arc<dyn EncodingSource> {
        match kind {
            MediaKind::Audio => self.sink.audio.clone(),
            MediaKind::Video => self.sink.video.clone(),
        }
    }

    fn stop(&self) {
        self.sink.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(len: usize, keyframe: bool) -> MediaFrame {
        MediaFrame::video(0, Bytes::from(vec![0u8; len]), keyframe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_window_and_deltas() {
        let mut counters = FrameCounters::default();
        counters.record(&video(1000, true));
        counters.record(&video(500, false));

        let first = counters.snapshot(MediaKind::Video);
        assert_eq!(first.num_frames, 2);
        assert_eq!(first.num_frames_delta, 2);
        assert_eq!(first.total_bytes, 1500);
        assert_eq!(first.bitrate, 12_000);
        assert_eq!(first.iframes, 1);
        assert_eq!(first.pframes, 1);

        // Reading again inside the window reports the same deltas.
        tokio::time::advance(Duration::from_millis(250)).await;
        let again = counters.snapshot(MediaKind::Video);
        assert_eq!(again.num_frames_delta, 2);
        assert_eq!(again.iframes_delta, 1);
        assert_eq!(again.pframes_delta, 1);
        assert_eq!(again.bitrate, 12_000);

        tokio::time::advance(Duration::from_millis(1250)).await;
        counters.record(&video(250, false));

        let second = counters.snapshot(MediaKind::Video);
        assert_eq!(second.num_frames, 3);
        assert_eq!(second.num_frames_delta, 1);
        assert_eq!(second.iframes_delta, 0);
        assert_eq!(second.bitrate, 2_000);
    }

    #[tokio::test]
    async fn test_router_splits_by_kind_and_honours_mute() {
        let bridge = LocalIncomingBridge::new(200, 600, JobQueue::spawn(&tokio::runtime::Handle::current()));
        let listener = bridge.frame_listener();

        listener.on_media_frame(&MediaFrame::audio(0, Bytes::from_static(b"a")));
        listener.on_media_frame(&video(10, true));
        bridge.source(MediaKind::Audio).mute(true);
        listener.on_media_frame(&MediaFrame::audio(20, Bytes::from_static(b"b")));

        assert_eq!(bridge.source(MediaKind::Audio).update().num_frames, 2);
        assert_eq!(bridge.source(MediaKind::Video).update().num_frames, 1);

        bridge.stop();
        listener.on_media_frame(&video(10, false));
        assert_eq!(bridge.source(MediaKind::Video).update().num_frames, 1);
    }

    #[tokio::test]
    async fn test_update_async_goes_through_queue() {
        let jobs = JobQueue::spawn(&tokio::runtime::Handle::current());
        let counters = LocalCounters::new(MediaKind::Audio, jobs);
        counters.record(&MediaFrame::audio(0, Bytes::from_static(b"abcd")));

        let snapshot = counters.update_async().await;
        assert_eq!(snapshot.total_bytes, 4);
        assert_eq!(snapshot.target_bitrate, None);
    }
}
