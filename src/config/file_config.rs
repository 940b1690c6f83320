use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub app_name: Option<String>,
    pub metrics_port: Option<u16>,

    pub worker: Option<WorkerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<f64>,
    /// Queues to take jobs from; empty means every queue.
    pub queues: Option<Vec<String>>,
    pub shutdown_timeout_secs: Option<u64>,
    pub lease_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/data"
            app_name = "friends"
            metrics_port = 9100

            [worker]
            poll_interval_ms = 250
            concurrency = 2
            max_attempts = 7
            initial_backoff_secs = 1
            max_backoff_secs = 120
            backoff_multiplier = 3.0
            jitter = 0.0
            queues = ["default", "mailers"]
            shutdown_timeout_secs = 10
            lease_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.metrics_port, Some(9100));
        let worker = config.worker.unwrap();
        assert_eq!(worker.concurrency, Some(2));
        assert_eq!(worker.lease_timeout_secs, Some(60));
        assert_eq!(
            worker.queues,
            Some(vec!["default".to_string(), "mailers".to_string()])
        );
    }

    #[test]
    fn test_parse_empty_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.worker.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "app_name = \"buddies\"\n[worker]\nconcurrency = 8").unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.app_name.as_deref(), Some("buddies"));
        assert_eq!(config.worker.unwrap().concurrency, Some(8));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = [").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
