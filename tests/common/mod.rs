//! Common test infrastructure
//!
//! Each test gets an isolated app with its own temp database directory.
//! Tests should only import from this module, not from internal submodules.

mod constants;
mod fixtures;

pub use constants::*;
pub use fixtures::TestApp;
