//! Brokers backed by files in a temp directory

use crate::crypto::FakeKeyCrypto;
use proxbox_core::{Broker, ProxboxConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Base port used by test brokers
pub const TEST_BASE_PORT: u16 = 8890;

/// A broker whose files live in a private temp directory
///
/// The directory is removed when the fixture is dropped.
pub struct TestBroker {
    dir: TempDir,
    config: ProxboxConfig,
    broker: Broker,
}

impl TestBroker {
    /// Broker with [`FakeKeyCrypto`] and default test settings
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let config = ProxboxConfig {
            gateway_host: "10.0.0.1".to_string(),
            root_domain: "proxbox.test".to_string(),
            base_port: TEST_BASE_PORT,
            authorized_keys_path: dir.path().join("host_ssh/authorized_keys"),
            rules_path: dir.path().join("rules.toml"),
            ..ProxboxConfig::default()
        };
        let broker = Broker::new(&config, Arc::new(FakeKeyCrypto)).expect("valid test config");
        Self {
            dir,
            config,
            broker,
        }
    }

    /// The broker under test
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Settings the broker was built from
    pub fn config(&self) -> &ProxboxConfig {
        &self.config
    }

    /// Root of the temp directory
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Access-control file path
    pub fn keys_path(&self) -> PathBuf {
        self.config.authorized_keys_path.clone()
    }

    /// Rule file path
    pub fn rules_path(&self) -> PathBuf {
        self.config.rules_path.clone()
    }
}

impl Default for TestBroker {
    fn default() -> Self {
        Self::new()
    }
}
