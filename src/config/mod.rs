mod file_config;

pub use file_config::{FileConfig, WorkerConfig};

use crate::global_id::validate_app;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

pub const DEFAULT_APP_NAME: &str = "friends";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub app_name: Option<String>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// App segment of the global ids this process issues and accepts.
    pub app_name: String,
    /// Serve `/metrics` on this port while working, if set.
    pub metrics_port: Option<u16>,

    pub worker: WorkerSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let app_name = file
            .app_name
            .or_else(|| cli.app_name.clone())
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        validate_app(&app_name).context("Invalid app name")?;

        let metrics_port = file.metrics_port.or(cli.metrics_port);

        // Worker settings - merge file config with defaults
        let defaults = WorkerSettings::default();
        let worker_file = file.worker.unwrap_or_default();
        let worker = WorkerSettings {
            poll_interval_ms: worker_file
                .poll_interval_ms
                .unwrap_or(defaults.poll_interval_ms),
            concurrency: worker_file.concurrency.unwrap_or(defaults.concurrency),
            max_attempts: worker_file.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff_secs: worker_file
                .initial_backoff_secs
                .unwrap_or(defaults.initial_backoff_secs),
            max_backoff_secs: worker_file
                .max_backoff_secs
                .unwrap_or(defaults.max_backoff_secs),
            backoff_multiplier: worker_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            jitter: worker_file.jitter.unwrap_or(defaults.jitter),
            queues: worker_file.queues.unwrap_or(defaults.queues),
            shutdown_timeout_secs: worker_file
                .shutdown_timeout_secs
                .unwrap_or(defaults.shutdown_timeout_secs),
            lease_timeout_secs: worker_file
                .lease_timeout_secs
                .unwrap_or(defaults.lease_timeout_secs),
        };
        worker.validate()?;

        Ok(AppConfig {
            db_dir,
            app_name,
            metrics_port,
            worker,
        })
    }

    pub fn friends_db_path(&self) -> PathBuf {
        self.db_dir.join("friends.db")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    /// Total executions per job, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub jitter: f64,
    pub queues: Vec<String>,
    pub shutdown_timeout_secs: u64,
    /// Silence after which another worker may take over a running job.
    pub lease_timeout_secs: u64,
}

impl WorkerSettings {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("worker.concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("worker.max_attempts must be at least 1");
        }
        if self.backoff_multiplier < 1.0 {
            bail!(
                "worker.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            );
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            bail!("worker.jitter must be between 0.0 and 1.0, got {}", self.jitter);
        }
        if self.lease_timeout_secs == 0 {
            bail!("worker.lease_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            concurrency: 4,
            max_attempts: 5,
            initial_backoff_secs: 3,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
            jitter: 0.15,
            queues: vec!["default".to_string()],
            shutdown_timeout_secs: 30,
            lease_timeout_secs: 300,
        }
    }
}
