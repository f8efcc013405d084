//! Track statistics types
//!
//! A [`TrackStats`] map holds one [`EncodingStats`] per encoding id (the empty
//! string is the default, single-layer encoding).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::engine::{EncodingCounters, LayerCounters};

/// Spatial/temporal layer id used for encodings without explicit layers
pub const MAX_LAYER_ID: u8 = 255;

/// Stats for every encoding of a track, keyed by encoding id
pub type TrackStats = BTreeMap<String, EncodingStats>;

/// Stats for every track of a stream bridge, keyed by track id
pub type StreamStats = BTreeMap<String, TrackStats>;

/// Packet waiting times in the engine buffer before delivery, in ms
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WaitTime {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

/// Per spatial/temporal layer stats
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStats {
    /// Copied from the owning encoding
    pub simulcast_idx: i32,
    pub spatial_layer_id: u8,
    pub temporal_layer_id: u8,
    pub total_bytes: Option<u64>,
    pub num_packets: Option<u64>,
    /// Bits per second over the last second
    pub bitrate: u64,
    pub target_bitrate: Option<u64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

impl From<&LayerCounters> for LayerStats {
    fn from(layer: &LayerCounters) -> Self {
        Self {
            simulcast_idx: -1,
            spatial_layer_id: layer.spatial_layer_id,
            temporal_layer_id: layer.temporal_layer_id,
            total_bytes: Some(layer.total_bytes),
            num_packets: Some(layer.num_packets),
            bitrate: layer.bitrate,
            target_bitrate: layer.target_bitrate,
            target_width: layer.target_width,
            target_height: layer.target_height,
        }
    }
}

/// Stats of the media stream of an encoding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaStats {
    pub num_packets: u64,
    pub num_packets_delta: u64,
    pub num_frames: u64,
    pub num_frames_delta: u64,
    pub total_bytes: u64,
    pub bitrate: u64,
    pub layers: Vec<LayerStats>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
}

/// Retransmission stream stats; RTMP sources never have one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtxStats {}

/// Snapshot of one encoding
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingStats {
    /// Milliseconds since the Unix epoch when this snapshot was taken
    pub timestamp: u64,
    pub wait_time: WaitTime,
    pub media: MediaStats,
    pub rtx: RtxStats,
    pub num_packets: u64,
    pub num_packets_delta: u64,
    pub num_frames: u64,
    pub num_frames_delta: u64,
    /// Media bitrate in bps
    pub bitrate: u64,
    /// Accumulated bitrate of media and rtx streams in bps
    pub total: u64,
    /// Rank among active encodings by bitrate (0 = highest), -1 if inactive
    pub simulcast_idx: i32,
    /// Round trip time in ms, taken from the parent stream
    pub rtt: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub iframes: Option<u64>,
    pub iframes_delta: Option<u64>,
    pub bframes: Option<u64>,
    pub bframes_delta: Option<u64>,
    pub pframes: Option<u64>,
    pub pframes_delta: Option<u64>,
    pub codec: Option<String>,
    pub target_bitrate: Option<u64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub(crate) refreshed_at: Instant,
}

impl EncodingStats {
    /// Derive a snapshot from raw engine counters
    pub fn from_counters(counters: &EncodingCounters, rtt: Option<u32>) -> Self {
        let has_dimensions = counters.width > 0 && counters.height > 0;
        let dimension = |v: u32| has_dimensions.then_some(v);
        let frame_count = |v: u64| has_dimensions.then_some(v);

        let media = MediaStats {
            num_packets: counters.num_packets,
            num_packets_delta: counters.num_packets_delta,
            num_frames: counters.num_frames,
            num_frames_delta: counters.num_frames_delta,
            total_bytes: counters.total_bytes,
            bitrate: counters.bitrate,
            layers: counters.layers.iter().map(LayerStats::from).collect(),
            width: dimension(counters.width),
            height: dimension(counters.height),
            codec: counters.codec.clone(),
        };

        Self {
            timestamp: unix_millis(),
            wait_time: WaitTime {
                min: counters.min_waited_time,
                max: counters.max_waited_time,
                avg: counters.avg_waited_time,
            },
            num_packets: media.num_packets,
            num_packets_delta: media.num_packets_delta,
            num_frames: media.num_frames,
            num_frames_delta: media.num_frames_delta,
            bitrate: media.bitrate,
            total: media.bitrate,
            rtx: RtxStats::default(),
            simulcast_idx: -1,
            rtt,
            width: dimension(counters.width),
            height: dimension(counters.height),
            iframes: frame_count(counters.iframes),
            iframes_delta: frame_count(counters.iframes_delta),
            bframes: frame_count(counters.bframes),
            bframes_delta: frame_count(counters.bframes_delta),
            pframes: frame_count(counters.pframes),
            pframes_delta: frame_count(counters.pframes_delta),
            codec: counters.codec.clone(),
            target_bitrate: counters.target_bitrate,
            target_width: counters.target_width,
            target_height: counters.target_height,
            refreshed_at: Instant::now(),
            media,
        }
    }

    /// Whether the encoding is currently receiving media
    pub fn is_active(&self) -> bool {
        self.bitrate > 0
    }

    /// Time elapsed since the counters were pulled from the engine
    pub fn age(&self) -> std::time::Duration {
        self.refreshed_at.elapsed()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
