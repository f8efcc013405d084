//! Track statistics
//!
//! Raw engine counters are turned into [`EncodingStats`] snapshots, cached
//! for a short window and ranked by bitrate to assign simulcast indices.

pub mod cache;
pub mod layers;
pub mod metrics;

pub use cache::{CachedEncoding, RttProbe, StatsCache, STATS_CACHE_TTL};
pub use layers::{
    active_layers, assign_simulcast_indices, ActiveEncoding, ActiveLayers, InactiveEncoding,
    LayerInfo,
};
pub use metrics::{
    EncodingStats, LayerStats, MediaStats, RtxStats, StreamStats, TrackStats, WaitTime,
    MAX_LAYER_ID,
};
