//! config types.

/// Configuration for running a RelaySrv.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker thread count.
    ///
    /// Relay actions are handled with blocking locks and blocking
    /// write-through to disk, so the workers will mostly be bound on io
    /// or lock hand-off, not on cpu. More workers than cpus is fine,
    /// but every request contends on the same three state units, so
    /// there is little point going much higher.
    ///
    /// Defaults:
    /// - `testing = 2`
    /// - `production = 4 * cpu_count`
    pub worker_thread_count: usize,

    /// The duration the idle sweep thread sleeps between checks to see
    /// if the server is shutting down.
    ///
    /// Setting this very high will cause ctrl-c / server shutdown to be
    /// slow. Setting this very low will increase cpu overhead.
    ///
    /// Defaults:
    /// - `testing = 10ms`
    /// - `production = 2s`
    pub request_listen_duration: std::time::Duration,

    /// The address(es) at which to listen.
    ///
    /// Defaults:
    /// - `testing = "[127.0.0.1:0]"`
    /// - `production = "[0.0.0.0:8080, [::]:8080]"`
    pub listen_address_list: Vec<std::net::SocketAddr>,

    /// Directory holding `chat-log.json`, `chat-users.json` and
    /// `chat-topic.json`. If `None`, relay state lives in memory only.
    ///
    /// Defaults:
    /// - `testing = None`
    /// - `production = None`
    pub data_dir: Option<std::path::PathBuf>,

    /// A presence lease not renewed for longer than this is evicted,
    /// and a "left (timeout)" record is appended for it.
    ///
    /// Defaults:
    /// - `testing = 45s`
    /// - `production = 45s`
    pub presence_timeout: std::time::Duration,

    /// Records older than this are pruned from the log.
    ///
    /// This must comfortably exceed the client poll interval plus
    /// scheduling jitter, otherwise a client cursor will skip records
    /// that aged out between two polls.
    ///
    /// Defaults:
    /// - `testing = 30s`
    /// - `production = 30s`
    pub relay_window: std::time::Duration,

    /// Maintenance runs before every request. This worker additionally
    /// sweeps on this interval so leases expire on an idle relay.
    ///
    /// Defaults:
    /// - `testing = 1s`
    /// - `production = 10s`
    pub idle_sweep_interval: std::time::Duration,

    /// Maximum accepted request body size in bytes.
    ///
    /// Defaults:
    /// - `testing = 4096`
    /// - `production = 4096`
    pub max_body_bytes: usize,

    /// The topic text used before anyone sets one.
    pub default_topic: String,

    /// The author of the default topic, also used for topic changes
    /// posted without a user.
    pub default_topic_author: String,
}

impl Config {
    /// Get a relay config suitable for testing.
    pub fn testing() -> Self {
        Self {
            worker_thread_count: 2,
            request_listen_duration: std::time::Duration::from_millis(10),
            listen_address_list: vec![(std::net::Ipv4Addr::LOCALHOST, 0).into()],
            data_dir: None,
            presence_timeout: std::time::Duration::from_secs(45),
            relay_window: std::time::Duration::from_secs(30),
            idle_sweep_interval: std::time::Duration::from_secs(1),
            max_body_bytes: 4096,
            default_topic: "Welcome to the relay".into(),
            default_topic_author: "Admin".into(),
        }
    }

    /// Get a relay config suitable for production.
    pub fn production() -> Self {
        Self {
            worker_thread_count: num_cpus::get() * 4,
            request_listen_duration: std::time::Duration::from_secs(2),
            listen_address_list: vec![
                (std::net::Ipv4Addr::UNSPECIFIED, 8080).into(),
                (std::net::Ipv6Addr::UNSPECIFIED, 8080).into(),
            ],
            data_dir: None,
            presence_timeout: std::time::Duration::from_secs(45),
            relay_window: std::time::Duration::from_secs(30),
            idle_sweep_interval: std::time::Duration::from_secs(10),
            max_body_bytes: 4096,
            default_topic: "Welcome to the relay".into(),
            default_topic_author: "Admin".into(),
        }
    }
}
