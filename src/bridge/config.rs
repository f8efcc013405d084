//! Incoming bridge configuration

use crate::error::ValidationError;

/// Upper bound for both buffering parameters, in ms
pub const MAX_BRIDGE_DELAY: i64 = 1000;

/// Jitter buffer settings of an incoming stream bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Maximum lateness of a frame before it is dropped, in ms
    pub max_late_offset: i64,

    /// Maximum time a frame is held for reordering, in ms
    pub max_buffering_time: i64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_late_offset: 200,
            max_buffering_time: 600,
        }
    }
}

impl BridgeConfig {
    pub fn new(max_late_offset: i64, max_buffering_time: i64) -> Self {
        Self {
            max_late_offset,
            max_buffering_time,
        }
    }

    /// Set the maximum late offset
    pub fn max_late_offset(mut self, ms: i64) -> Self {
        self.max_late_offset = ms;
        self
    }

    /// Set the maximum buffering time
    pub fn max_buffering_time(mut self, ms: i64) -> Self {
        self.max_buffering_time = ms;
        self
    }

    /// Check both values lie in `[0, 1000]`
    pub fn validate(&self) -> Result<(), ValidationError> {
        check("maxLateOffset", self.max_late_offset)?;
        check("maxBufferingTime", self.max_buffering_time)
    }
}

fn check(name: &'static str, value: i64) -> Result<(), ValidationError> {
    if value < 0 {
        Err(ValidationError::Negative { name })
    } else if value > MAX_BRIDGE_DELAY {
        Err(ValidationError::TooHigh {
            name,
            max: MAX_BRIDGE_DELAY,
        })
    } else {
        Ok(())
    }
}
