//! Friend records with a name-capitalization job that runs inline or
//! through a persistent SQLite-backed job queue.

pub mod app;
pub mod background_jobs;
pub mod config;
pub mod friend_store;
pub mod global_id;
pub mod metrics;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use app::FriendsApp;
pub use background_jobs::jobs::CapitalizeNameJob;
pub use background_jobs::{JobDispatcher, JobWorker, SqliteJobQueueStore};
pub use friend_store::{Friend, FriendStore, NewFriend, SqliteFriendStore};
pub use global_id::GlobalId;
