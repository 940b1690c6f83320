use super::{GlobalId, GlobalIdError};
use crate::friend_store::{Friend, FriendStore};
use std::sync::Arc;
use thiserror::Error;

/// Model name used in global ids of `Friend` records.
pub const FRIEND_MODEL: &str = "Friend";

/// A record that can be referenced by a global id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Friend(Friend),
}

impl Record {
    pub fn model_name(&self) -> &'static str {
        match self {
            Record::Friend(_) => FRIEND_MODEL,
        }
    }

    pub fn model_id(&self) -> String {
        match self {
            Record::Friend(friend) => friend.id.to_string(),
        }
    }

    pub fn to_global_id(&self, app: &str) -> Result<GlobalId, GlobalIdError> {
        GlobalId::new(app, self.model_name(), self.model_id())
    }

    pub fn as_friend(&self) -> Option<&Friend> {
        match self {
            Record::Friend(friend) => Some(friend),
        }
    }
}

impl From<Friend> for Record {
    fn from(friend: Friend) -> Self {
        Record::Friend(friend)
    }
}

#[derive(Debug, Error)]
pub enum LocateError {
    /// The id can never resolve here: other app, unknown model, malformed id.
    #[error("{0}")]
    Invalid(String),

    /// The backing store failed; the same id may resolve later.
    #[error("Failed to load record: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Resolves global ids back into records.
pub trait Locator: Send + Sync {
    /// App name this locator issues and accepts ids for.
    fn app(&self) -> &str;

    /// Returns `Ok(None)` when the id is well-formed but the record is gone.
    fn locate(&self, gid: &GlobalId) -> Result<Option<Record>, LocateError>;
}

/// Locator backed by the application's stores.
pub struct StoreLocator {
    app: String,
    friend_store: Arc<dyn FriendStore>,
}

impl StoreLocator {
    pub fn new(app: impl Into<String>, friend_store: Arc<dyn FriendStore>) -> Self {
        Self {
            app: app.into(),
            friend_store,
        }
    }
}

impl Locator for StoreLocator {
    fn app(&self) -> &str {
        &self.app
    }

    fn locate(&self, gid: &GlobalId) -> Result<Option<Record>, LocateError> {
        if gid.app() != self.app {
            return Err(LocateError::Invalid(format!(
                "Global id {} belongs to app '{}', expected '{}'",
                gid,
                gid.app(),
                self.app
            )));
        }

        match gid.model_name() {
            FRIEND_MODEL => {
                let id: i64 = gid.model_id().parse().map_err(|e| {
                    LocateError::Invalid(format!("Invalid Friend id in {}: {}", gid, e))
                })?;
                Ok(self.friend_store.get_friend(id)?.map(Record::Friend))
            }
            other => Err(LocateError::Invalid(format!(
                "Unknown model '{}' in {}",
                other, gid
            ))),
        }
    }
}
