use std::time::Duration;

/// Per-process settings threaded through constructors; there is no global.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Control-plane call timeout (join, unregister, set-primary phases).
    pub cplane_timeout: Duration,
    /// Fan-out calls that may hit busy targets (downloader admin, summary).
    pub max_host_busy: Duration,
    /// Long-running broadcast operations.
    pub long_timeout: Duration,
    /// Paged listing broadcast timeout.
    pub list_objects_timeout: Duration,

    /// Shared secret keying the metasync envelope signature.
    pub cluster_secret: String,
    /// Clients inside this network get intra-data redirect URLs.
    pub local_net: Option<ipnet::IpNet>,

    pub keepalive_interval: Duration,
    /// A member silent for this long is dropped by the primary.
    pub keepalive_down: Duration,
    pub metasync_retry_interval: Duration,
    pub rebalance_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            cplane_timeout: Duration::from_secs(2),
            max_host_busy: Duration::from_secs(20),
            long_timeout: Duration::from_secs(60),
            list_objects_timeout: Duration::from_secs(30),
            cluster_secret: "cumulus".to_string(),
            local_net: None,
            keepalive_interval: Duration::from_secs(3),
            keepalive_down: Duration::from_secs(15),
            metasync_retry_interval: Duration::from_secs(2),
            rebalance_enabled: true,
        }
    }
}
