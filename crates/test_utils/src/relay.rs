//! A relay server for integration tests.

use chatrelay_srv::{Config, RelaySrv};

/// A [RelaySrv] bound to an ephemeral localhost port.
///
/// The server hands its socket to a tokio runtime of its own, so start it
/// outside of any runtime.
pub struct TestRelay {
    srv: RelaySrv,
}

impl TestRelay {
    /// Start a relay with the testing configuration.
    pub fn start() -> Self {
        Self::with_config(Config::testing())
    }

    /// Start a relay with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let srv = RelaySrv::new(config).expect("failed to start test relay");
        tracing::debug!(addrs = ?srv.listen_addrs(), "test relay started");
        Self { srv }
    }

    /// The relay endpoint url, as a client would configure it.
    pub fn url(&self) -> String {
        format!("http://{}/chat.php", self.srv.listen_addrs()[0])
    }

    /// The running server.
    pub fn srv(&self) -> &RelaySrv {
        &self.srv
    }
}
