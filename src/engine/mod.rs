//! Media engine seam
//!
//! RTMP chunking, AMF codecs, transports and RTP packetization all live in an
//! external media engine. The bridging layer reaches it through the traits in
//! this module. Engine objects never hold strong references to the wrappers
//! built on top of them: listeners are handed over as `Weak`, and every
//! callback may arrive from the engine's own thread.
//!
//! [`local::LocalEngine`] is a complete in-process implementation.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;

use crate::amf::AmfValue;
use crate::client::command::CompletionToken;
use crate::protocol::ErrorCode;

pub mod local;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single media frame moving between engine objects
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: MediaKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Frame payload (reference counted, never copied on fan-out)
    pub data: Bytes,
    pub is_keyframe: bool,
}

impl MediaFrame {
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: MediaKind::Audio,
            timestamp,
            data,
            is_keyframe: false,
        }
    }

    pub fn video(timestamp: u32, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            kind: MediaKind::Video,
            timestamp,
            data,
            is_keyframe,
        }
    }
}

/// Byte counters of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub in_bytes: u64,
    pub out_bytes: u64,
}

/// Per spatial/temporal layer counters, when the source reports them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerCounters {
    pub spatial_layer_id: u8,
    pub temporal_layer_id: u8,
    pub total_bytes: u64,
    pub num_packets: u64,
    pub bitrate: u64,
    pub target_bitrate: Option<u64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

/// Raw counters reported by the engine for one encoding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingCounters {
    pub num_packets: u64,
    pub num_packets_delta: u64,
    pub num_frames: u64,
    pub num_frames_delta: u64,
    pub total_bytes: u64,
    /// Bits per second over the last second
    pub bitrate: u64,
    pub min_waited_time: u64,
    pub max_waited_time: u64,
    pub avg_waited_time: f64,
    /// Zero when unknown
    pub width: u32,
    /// Zero when unknown
    pub height: u32,
    pub iframes: u64,
    pub iframes_delta: u64,
    pub bframes: u64,
    pub bframes_delta: u64,
    pub pframes: u64,
    pub pframes_delta: u64,
    pub codec: Option<String>,
    pub target_bitrate: Option<u64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub layers: Vec<LayerCounters>,
}

/// Something that reports encoding counters
#[async_trait]
pub trait EncodingSource: Send + Sync {
    /// Refresh and return the counters synchronously
    fn update(&self) -> EncodingCounters;

    /// Refresh the counters with a round trip to the engine thread
    async fn update_async(&self) -> EncodingCounters {
        self.update()
    }
}

/// Consumer of media frames
pub trait MediaFrameListener: Send + Sync {
    fn on_media_frame(&self, frame: &MediaFrame);
}

/// An incoming encoding that media consumers can register on
pub trait MediaSource: EncodingSource {
    fn add_media_listener(&self, listener: Arc<dyn MediaFrameListener>);

    fn remove_media_listener(&self, listener: &Arc<dyn MediaFrameListener>);

    /// Target bitrate hint in kbps
    fn set_target_bitrate_hint(&self, _kbps: u32) {}

    fn mute(&self, _muted: bool) {}
}

/// Engine side of an incoming stream bridge (RTMP media in, frames out)
pub trait IncomingBridgeHandle: Send + Sync {
    /// Listener to register on a net-stream to feed this bridge
    fn frame_listener(&self) -> Arc<dyn MediaFrameListener>;

    fn source(&self, kind: MediaKind) -> Arc<dyn MediaSource>;

    /// Round trip time of the transport feeding this bridge, in ms
    fn rtt(&self) -> Option<u32> {
        None
    }

    fn stop(&self);
}

/// Engine side of an outgoing stream bridge (frames in, RTMP media out)
pub trait OutgoingBridgeHandle: Send + Sync {
    fn frame_listener(&self) -> Arc<dyn MediaFrameListener>;

    fn counters(&self, kind: MediaKind) -> Arc<dyn EncodingSource>;

    fn rtt(&self) -> Option<u32> {
        None
    }

    fn stop(&self);
}

/// Callbacks for a net-stream inside an accepted connection
pub trait NetStreamListener: Send + Sync {
    fn on_command(
        &self,
        name: &str,
        params: AmfValue,
        transaction_id: f64,
        extra: Vec<AmfValue>,
    );

    /// The peer deleted the stream
    fn on_stopped(&self);
}

/// A net-stream inside an accepted connection
pub trait NetStreamHandle: Send + Sync {
    fn id(&self) -> u32;

    fn set_listener(&self, listener: Weak<dyn NetStreamListener>);

    fn reset_listener(&self);

    fn send_status(&self, transaction_id: f64, code: &str, level: &str, description: &str);

    fn create_incoming_bridge(
        &self,
        max_late_offset: u32,
        max_buffering_time: u32,
    ) -> Arc<dyn IncomingBridgeHandle>;

    fn add_media_listener(&self, listener: Arc<dyn MediaFrameListener>);

    fn remove_media_listener(&self, listener: &Arc<dyn MediaFrameListener>);
}

/// Callbacks for an accepted inbound connection
pub trait ConnectionListener: Send + Sync {
    fn on_stream(&self, stream: Arc<dyn NetStreamHandle>);

    fn on_disconnected(&self);
}

/// An inbound connection waiting for (or past) the accept decision
pub trait ConnectionHandle: Send + Sync {
    fn peer_addr(&self) -> SocketAddr;

    fn accept(&self, listener: Weak<dyn ConnectionListener>);

    fn reject(&self);

    fn stats(&self) -> ConnectionStats;

    fn stop(&self);
}

/// Receives inbound connections for one application name
pub trait ApplicationListener: Send + Sync {
    fn on_connect(&self, app_name: &str, connection: Arc<dyn ConnectionHandle>);
}

/// A listening RTMP endpoint
pub trait ServerHandle: Send + Sync {
    fn start(&self, port: u16) -> std::io::Result<()>;

    fn add_application(&self, name: &str, listener: Weak<dyn ApplicationListener>);

    fn remove_application(&self, name: &str);

    fn stop(&self);
}

/// Callbacks for an outbound connection
pub trait ClientConnectionListener: Send + Sync {
    fn on_connected(&self);

    fn on_disconnected(&self, code: ErrorCode);

    /// Command from the peer; `stream_id` 0 is the connection channel
    fn on_command(&self, stream_id: u32, name: &str, params: Vec<AmfValue>);
}

/// An outbound connection
pub trait ClientConnectionHandle: Send + Sync {
    /// Start connecting. Only synchronously detectable failures are returned;
    /// everything else arrives through `on_disconnected`.
    fn connect(&self, server: &str, port: u16, app: &str) -> ErrorCode;

    fn create_stream(&self, token: CompletionToken);

    fn publish(&self, stream_id: u32, name: &str);

    fn delete_stream(&self, stream_id: u32, token: CompletionToken);

    fn create_outgoing_bridge(&self, stream_id: u32) -> Arc<dyn OutgoingBridgeHandle>;

    fn stats(&self) -> ConnectionStats;

    fn stop(&self);
}

/// Factory for the engine's top-level objects
pub trait Engine: Send + Sync {
    fn create_server(&self) -> Arc<dyn ServerHandle>;

    fn create_client_connection(
        &self,
        listener: Weak<dyn ClientConnectionListener>,
    ) -> Arc<dyn ClientConnectionHandle>;
}
