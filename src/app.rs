//! Wiring of stores, registry and job plumbing for one application instance.

use crate::background_jobs::jobs::default_registry;
use crate::background_jobs::{
    create_worker, JobContext, JobDispatcher, JobQueueStore, JobRegistry, JobWorker,
    SqliteJobQueueStore, WorkerHandle,
};
use crate::config::AppConfig;
use crate::friend_store::{FriendStore, SqliteFriendStore};
use crate::global_id::StoreLocator;
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct FriendsApp {
    pub config: AppConfig,
    pub friend_store: Arc<dyn FriendStore>,
    pub queue_store: Arc<dyn JobQueueStore>,
    pub registry: Arc<JobRegistry>,
    shutdown_token: CancellationToken,
}

impl FriendsApp {
    /// Opens (creating or migrating as needed) both databases under `config.db_dir`.
    pub fn open(config: AppConfig, shutdown_token: CancellationToken) -> Result<Self> {
        info!("Opening friends database at {:?}...", config.friends_db_path());
        let friend_store = Arc::new(SqliteFriendStore::new(config.friends_db_path())?);
        info!("Opening jobs database at {:?}...", config.jobs_db_path());
        let queue_store = Arc::new(SqliteJobQueueStore::new(config.jobs_db_path())?);

        Ok(Self {
            config,
            friend_store,
            queue_store,
            registry: Arc::new(default_registry()),
            shutdown_token,
        })
    }

    pub fn context(&self) -> JobContext {
        let locator = Arc::new(StoreLocator::new(
            self.config.app_name.clone(),
            Arc::clone(&self.friend_store),
        ));
        JobContext::new(
            self.shutdown_token.clone(),
            Arc::clone(&self.friend_store),
            locator,
        )
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue_store),
            self.context(),
            self.config.worker.max_attempts,
        )
    }

    pub fn worker(&self) -> (JobWorker, WorkerHandle) {
        create_worker(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue_store),
            self.context(),
            &self.config.worker,
        )
    }
}
