//! Job implementations.

pub mod capitalize_name;

pub use capitalize_name::CapitalizeNameJob;

use super::JobRegistry;
use std::sync::Arc;

/// Registry holding every job this application knows how to run.
pub fn default_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(CapitalizeNameJob));
    registry
}
