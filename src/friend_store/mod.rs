//! Persistence for `Friend` records.

mod models;
mod schema;
mod sqlite_friend_store;

pub use models::{Friend, NewFriend};
pub use schema::FRIENDS_VERSIONED_SCHEMAS;
pub use sqlite_friend_store::SqliteFriendStore;

use anyhow::Result;

pub trait FriendStore: Send + Sync {
    fn create_friend(&self, new_friend: &NewFriend) -> Result<Friend>;
    fn get_friend(&self, id: i64) -> Result<Option<Friend>>;
    fn list_friends(&self, limit: usize, offset: usize) -> Result<Vec<Friend>>;
    fn count_friends(&self) -> Result<usize>;

    /// Overwrites the name and refreshes `updated_at`.
    /// Returns false when no friend with `id` exists.
    fn update_name(&self, id: i64, name: &str) -> Result<bool>;

    fn delete_friend(&self, id: i64) -> Result<bool>;
}
