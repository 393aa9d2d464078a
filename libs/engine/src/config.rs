//! Engine tuning knobs.

use serde::Deserialize;
use std::time::Duration;

/// Timing and capacity configuration for the message-passing core.
///
/// Defaults are associated constants so call sites and docs agree on the
/// numbers. Deserializable so an embedding application can load the values
/// from its own configuration surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between worker heartbeat beacons.
    pub heartbeat_interval: Duration,
    /// Consecutive missed beats before a worker is declared dead.
    pub heartbeat_miss_limit: u32,
}

impl EngineConfig {
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_HEARTBEAT_MISS_LIMIT: u32 = 5;
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_miss_limit: Self::DEFAULT_HEARTBEAT_MISS_LIMIT,
        }
    }
}
