use std::time::Duration;

/// Default outbound queue depth per connection, in frames.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Connection timings and limits.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Frames buffered per connection before deliveries start dropping.
    pub outbound_capacity: usize,
    /// A connection with no inbound frame or pong for this long is dropped.
    pub read_timeout: Duration,
    /// Upper bound on a single transport write.
    pub write_timeout: Duration,
    /// Largest inbound frame accepted by the upgrade.
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_frame_bytes: 512 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Heartbeat period: 9/10 of the read timeout, so a healthy peer's pong
    /// always lands inside the window.
    pub fn ping_period(&self) -> Duration {
        self.read_timeout * 9 / 10
    }
}
