//! Test app lifecycle management

use super::constants::*;
use friends_jobs::config::{AppConfig, CliConfig};
use friends_jobs::{Friend, FriendsApp, NewFriend};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// App instance over a temp db directory, seeded with two friends.
///
/// Retries are immediate so a single `drain()` walks a job through all of
/// its attempts. Claims lapse after one second without a heartbeat.
pub struct TestApp {
    pub app: FriendsApp,
    pub john: Friend,
    pub john_smith: Friend,
    pub shutdown_token: CancellationToken,
    // Held so the directory outlives the databases
    pub db_dir: TempDir,
}

impl TestApp {
    pub fn spawn() -> Self {
        let db_dir = TempDir::new().expect("Failed to create temp dir");
        let shutdown_token = CancellationToken::new();
        let app = Self::open(&db_dir, shutdown_token.clone());

        let john = app
            .friend_store
            .create_friend(&NewFriend::new(JOHN_NAME, JOHN_EMAIL))
            .expect("Failed to seed john");
        let john_smith = app
            .friend_store
            .create_friend(&NewFriend::new(JOHN_SMITH_NAME, JOHN_SMITH_EMAIL))
            .expect("Failed to seed john smith");

        Self {
            app,
            john,
            john_smith,
            shutdown_token,
            db_dir,
        }
    }

    /// Opens another app instance over the same databases, like a second process.
    pub fn reopen(&self, shutdown_token: CancellationToken) -> FriendsApp {
        Self::open(&self.db_dir, shutdown_token)
    }

    fn open(db_dir: &TempDir, shutdown_token: CancellationToken) -> FriendsApp {
        let cli = CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            app_name: Some(TEST_APP.to_string()),
            metrics_port: None,
        };
        let mut config = AppConfig::resolve(&cli, None).expect("Failed to resolve config");
        config.worker.poll_interval_ms = 20;
        config.worker.initial_backoff_secs = 0;
        config.worker.jitter = 0.0;
        config.worker.max_attempts = 3;
        config.worker.shutdown_timeout_secs = 2;
        config.worker.lease_timeout_secs = 1;

        FriendsApp::open(config, shutdown_token).expect("Failed to open app")
    }

    pub fn friend(&self, id: i64) -> Option<Friend> {
        self.app.friend_store.get_friend(id).expect("Failed to read friend")
    }

    /// Polls until `check` passes or `timeout` elapses.
    pub async fn wait_until<F: Fn() -> bool>(&self, timeout: Duration, check: F) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
