//! Capitalizes the name of a friend record.
//!
//! The first character becomes upper case and the rest lower case, so
//! "JOHN SMITH" is stored as "John smith". Only the `name` column is written.

use crate::background_jobs::{
    context::JobContext,
    dispatcher::JobDispatcher,
    job::{Job, JobError},
    queue_store::EnqueuedJob,
    JobArgument,
};
use crate::friend_store::Friend;
use anyhow::Result;
use tracing::{debug, info};

pub struct CapitalizeNameJob;

impl CapitalizeNameJob {
    pub const JOB_CLASS: &'static str = "CapitalizeNameJob";

    /// Queues capitalization of `friend`'s name.
    pub fn perform_later(dispatcher: &JobDispatcher, friend: &Friend) -> Result<EnqueuedJob> {
        dispatcher.perform_later(Self::JOB_CLASS, &[friend.clone().into()])
    }

    /// Capitalizes `friend`'s name right away.
    pub fn perform_now(dispatcher: &JobDispatcher, friend: &Friend) -> Result<(), JobError> {
        dispatcher.perform_now(Self::JOB_CLASS, &[friend.clone().into()])
    }
}

/// Upper-cases the first character and lower-cases everything after it.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            let mut capitalized: String = first.to_uppercase().collect();
            capitalized.push_str(&chars.as_str().to_lowercase());
            capitalized
        }
        None => String::new(),
    }
}

impl Job for CapitalizeNameJob {
    fn job_class(&self) -> &'static str {
        Self::JOB_CLASS
    }

    fn description(&self) -> &'static str {
        "Capitalizes the name of a friend"
    }

    fn perform(&self, ctx: &JobContext, args: &[JobArgument]) -> Result<(), JobError> {
        let friend = match args {
            [arg] => arg
                .as_record()
                .and_then(|record| record.as_friend())
                .ok_or_else(|| {
                    JobError::InvalidArguments("expected a Friend record".to_string())
                })?,
            _ => {
                return Err(JobError::InvalidArguments(format!(
                    "expected 1 argument, got {}",
                    args.len()
                )))
            }
        };

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let name = capitalize(&friend.name);
        if name == friend.name {
            debug!("Friend {} name already capitalized", friend.id);
            return Ok(());
        }

        let updated = ctx
            .friend_store
            .update_name(friend.id, &name)
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        if !updated {
            return Err(JobError::RecordNotFound(format!("Friend {}", friend.id)));
        }

        info!("Capitalized name of friend {}: {:?} -> {:?}", friend.id, friend.name, name);
        Ok(())
    }
}
