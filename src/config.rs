use std::time::Duration;

/// Tunables for a gossip node. `Default` matches the protocol's reference
/// timings; tests shrink the intervals to keep suites fast.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Target period between gossip ticks.
    pub gossip_interval: Duration,
    /// Slice length for the gossip worker's cooperative sleeps. The worker
    /// checks the shutdown flag between slices, so smaller values make
    /// shutdown more responsive at the cost of more wakeups.
    pub shutdown_poll_interval: Duration,
    /// Delay between bind attempts while the listen address is in use.
    pub bind_retry_delay: Duration,
    /// Maximum number of bind attempts while the address is in use.
    /// `None` retries indefinitely. Errors other than `EADDRINUSE` never
    /// retry regardless of this setting.
    pub bind_retry_limit: Option<u32>,
    /// Pause after a transient `accept` error before retrying.
    pub accept_retry_pause: Duration,
    /// Timeout for outbound `connect` calls (publish pool and gossip dials).
    pub connect_timeout: Duration,
    /// Size of the per-connection receive buffer. Also bounds how much of an
    /// `/info` reply the gossip worker will read in one burst.
    pub read_buffer_size: usize,
    /// TCP keepalive applied to outbound streams, `None` to disable.
    pub tcp_keepalive: Option<TcpKeepaliveConfig>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_secs(1),
            shutdown_poll_interval: Duration::from_millis(100),
            bind_retry_delay: Duration::from_secs(5),
            bind_retry_limit: None,
            accept_retry_pause: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 4096,
            tcp_keepalive: Some(TcpKeepaliveConfig::default()),
        }
    }
}

impl GossipConfig {
    /// Number of shutdown-poll sleeps that make up one gossip tick.
    pub fn gossip_poll_slices(&self) -> u32 {
        let poll = self.shutdown_poll_interval.as_millis().max(1);
        let interval = self.gossip_interval.as_millis();
        (interval.div_ceil(poll)).max(1) as u32
    }
}

/// Keepalive probe timing for pooled and gossip connections.
#[derive(Debug, Clone)]
pub struct TcpKeepaliveConfig {
    /// Idle time before the first probe.
    pub idle: Duration,
    /// Interval between probes.
    pub interval: Duration,
}

impl Default for TcpKeepaliveConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_tcp_keepalive() {
        let cfg = GossipConfig::default();
        assert!(cfg.tcp_keepalive.is_some());
    }

    #[test]
    fn default_tick_is_ten_poll_slices() {
        let cfg = GossipConfig::default();
        assert_eq!(cfg.gossip_poll_slices(), 10);
    }

    #[test]
    fn poll_slices_round_up_and_never_hit_zero() {
        let cfg = GossipConfig {
            gossip_interval: Duration::from_millis(250),
            shutdown_poll_interval: Duration::from_millis(100),
            ..GossipConfig::default()
        };
        assert_eq!(cfg.gossip_poll_slices(), 3);

        let cfg = GossipConfig {
            gossip_interval: Duration::from_millis(1),
            shutdown_poll_interval: Duration::from_millis(100),
            ..GossipConfig::default()
        };
        assert_eq!(cfg.gossip_poll_slices(), 1);
    }
}
