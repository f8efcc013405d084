//! Simulcast ranking and active layer selection

use std::cmp::Ordering;

use super::metrics::{LayerStats, TrackStats, MAX_LAYER_ID};

/// Summary of an encoding that is receiving media
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEncoding {
    pub id: String,
    pub simulcast_idx: i32,
    pub bitrate: u64,
    pub target_bitrate: Option<u64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    /// Explicit layers, highest bitrate first
    pub layers: Vec<LayerStats>,
}

/// An encoding with no media flowing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactiveEncoding {
    pub id: String,
}

/// A layer in the flattened, cross-encoding layer list
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub encoding_id: String,
    pub simulcast_idx: i32,
    pub spatial_layer_id: u8,
    pub temporal_layer_id: u8,
    pub bitrate: u64,
    pub target_bitrate: Option<u64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

/// Active and inactive encodings plus every selectable layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveLayers {
    /// Highest bitrate first
    pub active: Vec<ActiveEncoding>,
    pub inactive: Vec<InactiveEncoding>,
    /// Highest bitrate first
    pub layers: Vec<LayerInfo>,
}

/// Descending by target bitrate when every entry reports one, else by bitrate.
///
/// The whole set uses one key so the order stays total with mixed reports.
fn by_bitrate_desc<T>(
    items: &mut [T],
    bitrate: impl Fn(&T) -> u64,
    target: impl Fn(&T) -> Option<u64>,
) {
    if items.iter().all(|i| target(i).is_some()) {
        items.sort_by(|a, b| target(b).cmp(&target(a)));
    } else {
        items.sort_by(|a, b| bitrate(b).cmp(&bitrate(a)));
    }
}

/// Assign `simulcast_idx` to every encoding and its layers
///
/// Active encodings are ranked from 0 (highest bitrate) upwards; encodings
/// with a zero bitrate get -1. Ties keep encoding id order.
pub fn assign_simulcast_indices(stats: &mut TrackStats) {
    let mut ranked: Vec<(&String, u64, Option<u64>)> = stats
        .iter()
        .filter(|(_, s)| s.is_active())
        .map(|(id, s)| (id, s.bitrate, s.target_bitrate))
        .collect();
    by_bitrate_desc(&mut ranked, |e| e.1, |e| e.2);

    let order: Vec<String> = ranked.into_iter().map(|(id, _, _)| id.clone()).collect();

    for encoding in stats.values_mut() {
        encoding.simulcast_idx = -1;
    }
    for (idx, id) in order.iter().enumerate() {
        if let Some(encoding) = stats.get_mut(id) {
            encoding.simulcast_idx = idx as i32;
        }
    }
    for encoding in stats.values_mut() {
        let idx = encoding.simulcast_idx;
        for layer in &mut encoding.media.layers {
            layer.simulcast_idx = idx;
        }
    }
}

/// Split a stats snapshot into active/inactive encodings and layers
pub fn active_layers(stats: &TrackStats) -> ActiveLayers {
    let mut result = ActiveLayers::default();

    for (id, encoding) in stats {
        if !encoding.is_active() {
            result.inactive.push(InactiveEncoding { id: id.clone() });
            continue;
        }

        let mut layers = encoding.media.layers.clone();
        by_bitrate_desc(&mut layers, |l| l.bitrate, |l| l.target_bitrate);

        if layers.is_empty() {
            result.layers.push(LayerInfo {
                encoding_id: id.clone(),
                simulcast_idx: encoding.simulcast_idx,
                spatial_layer_id: MAX_LAYER_ID,
                temporal_layer_id: MAX_LAYER_ID,
                bitrate: encoding.bitrate,
                target_bitrate: encoding.target_bitrate,
                target_width: encoding.target_width,
                target_height: encoding.target_height,
            });
        } else {
            result.layers.extend(layers.iter().map(|layer| LayerInfo {
                encoding_id: id.clone(),
                simulcast_idx: layer.simulcast_idx,
                spatial_layer_id: layer.spatial_layer_id,
                temporal_layer_id: layer.temporal_layer_id,
                bitrate: layer.bitrate,
                target_bitrate: layer.target_bitrate,
                target_width: layer.target_width,
                target_height: layer.target_height,
            }));
        }

        result.active.push(ActiveEncoding {
            id: id.clone(),
            simulcast_idx: encoding.simulcast_idx,
            bitrate: encoding.bitrate,
            target_bitrate: encoding.target_bitrate,
            target_width: encoding.target_width,
            target_height: encoding.target_height,
            layers,
        });
    }

    result.active.sort_by(|a, b| cmp_desc(a.bitrate, b.bitrate));
    result.layers.sort_by(|a, b| cmp_desc(a.bitrate, b.bitrate));
    result
}

fn cmp_desc(a: u64, b: u64) -> Ordering {
    b.cmp(&a)
}
