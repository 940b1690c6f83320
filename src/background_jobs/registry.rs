use super::job::Job;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Maps job class names to the jobs that perform them.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Arc<dyn Job>) {
        let job_class = job.job_class().to_string();
        info!("Registering job: {} - {}", job_class, job.description());
        if self.jobs.insert(job_class.clone(), job).is_some() {
            warn!("Job class {} was already registered, replacing it", job_class);
        }
    }

    pub fn get(&self, job_class: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(job_class).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::{JobArgument, JobContext, JobError};

    struct NamedJob(&'static str, &'static str);

    impl Job for NamedJob {
        fn job_class(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            self.1
        }

        fn perform(&self, _ctx: &JobContext, _args: &[JobArgument]) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = JobRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(NamedJob("B", "second")));
        registry.register(Arc::new(NamedJob("A", "first")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("A").unwrap().description(), "first");
        assert!(registry.get("C").is_none());
    }

    #[test]
    fn test_register_replaces_same_class() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(NamedJob("A", "old")));
        registry.register(Arc::new(NamedJob("A", "new")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("A").unwrap().description(), "new");
    }
}
