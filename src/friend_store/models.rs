use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the `friends` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for inserting a new friend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewFriend {
    pub name: String,
    pub email: String,
}

impl NewFriend {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}
