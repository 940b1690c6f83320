//! Conversion of job arguments to and from their queued JSON form.
//!
//! Records never travel by value: they are replaced with
//! `{"_aj_globalid": "gid://..."}` when enqueued and located again right
//! before the job performs.

use super::job::JobError;
use crate::friend_store::Friend;
use crate::global_id::{GlobalId, GlobalIdError, LocateError, Locator, Record};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Object key marking a serialized record reference.
pub const GLOBALID_KEY: &str = "_aj_globalid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobArgument {
    Record(Record),
    Value(JsonValue),
}

impl JobArgument {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            JobArgument::Record(record) => Some(record),
            JobArgument::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&JsonValue> {
        match self {
            JobArgument::Value(value) => Some(value),
            JobArgument::Record(_) => None,
        }
    }
}

impl From<Record> for JobArgument {
    fn from(record: Record) -> Self {
        JobArgument::Record(record)
    }
}

impl From<Friend> for JobArgument {
    fn from(friend: Friend) -> Self {
        JobArgument::Record(Record::Friend(friend))
    }
}

impl From<JsonValue> for JobArgument {
    fn from(value: JsonValue) -> Self {
        JobArgument::Value(value)
    }
}

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("Argument object uses reserved key '{0}'")]
    ReservedKey(&'static str),

    #[error("Cannot build global id for argument: {0}")]
    GlobalId(#[from] GlobalIdError),
}

fn check_reserved_keys(value: &JsonValue) -> Result<(), ArgumentError> {
    match value {
        JsonValue::Object(map) => {
            if map.contains_key(GLOBALID_KEY) {
                return Err(ArgumentError::ReservedKey(GLOBALID_KEY));
            }
            map.values().try_for_each(check_reserved_keys)
        }
        JsonValue::Array(items) => items.iter().try_for_each(check_reserved_keys),
        _ => Ok(()),
    }
}

/// Serializes `args` into the JSON array stored with a queued job.
pub fn serialize_arguments(args: &[JobArgument], app: &str) -> Result<JsonValue, ArgumentError> {
    let serialized = args
        .iter()
        .map(|arg| match arg {
            JobArgument::Record(record) => {
                let gid = record.to_global_id(app)?;
                let mut map = Map::new();
                map.insert(GLOBALID_KEY.to_string(), JsonValue::String(gid.to_string()));
                Ok(JsonValue::Object(map))
            }
            JobArgument::Value(value) => {
                check_reserved_keys(value)?;
                Ok(value.clone())
            }
        })
        .collect::<Result<Vec<_>, ArgumentError>>()?;
    Ok(JsonValue::Array(serialized))
}

fn global_id_reference(value: &JsonValue) -> Option<&JsonValue> {
    match value {
        JsonValue::Object(map) if map.len() == 1 => map.get(GLOBALID_KEY),
        _ => None,
    }
}

/// Turns a queued JSON array back into arguments, locating every record.
pub fn deserialize_arguments(
    payload: &JsonValue,
    locator: &dyn Locator,
) -> Result<Vec<JobArgument>, JobError> {
    let items = payload.as_array().ok_or_else(|| {
        JobError::Deserialization(format!("expected an array of arguments, got {}", payload))
    })?;

    items
        .iter()
        .map(|item| match global_id_reference(item) {
            Some(JsonValue::String(uri)) => {
                let gid = GlobalId::parse(uri)
                    .map_err(|e| JobError::Deserialization(e.to_string()))?;
                match locator.locate(&gid) {
                    Ok(Some(record)) => Ok(JobArgument::Record(record)),
                    Ok(None) => Err(JobError::Deserialization(format!(
                        "Couldn't find {} with id={}",
                        gid.model_name(),
                        gid.model_id()
                    ))),
                    Err(e @ LocateError::Storage(_)) => {
                        Err(JobError::ExecutionFailed(e.to_string()))
                    }
                    Err(e @ LocateError::Invalid(_)) => {
                        Err(JobError::Deserialization(e.to_string()))
                    }
                }
            }
            Some(other) => Err(JobError::Deserialization(format!(
                "{} must be a string, got {}",
                GLOBALID_KEY, other
            ))),
            None => Ok(JobArgument::Value(item.clone())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friend_store::{FriendStore, NewFriend, SqliteFriendStore};
    use crate::global_id::StoreLocator;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<SqliteFriendStore>, StoreLocator, Friend) {
        let store = Arc::new(SqliteFriendStore::in_memory().unwrap());
        let friend = store
            .create_friend(&NewFriend::new("john", "john@example.com"))
            .unwrap();
        let locator = StoreLocator::new("friends", store.clone());
        (store, locator, friend)
    }

    #[test]
    fn test_record_serialized_as_global_id() {
        let (_, _, friend) = setup();
        let payload = serialize_arguments(&[friend.clone().into()], "friends").unwrap();

        assert_eq!(
            payload,
            json!([{ "_aj_globalid": format!("gid://friends/Friend/{}", friend.id) }])
        );
    }

    #[test]
    fn test_plain_values_kept_as_is() {
        let args = vec![
            JobArgument::from(json!(1)),
            JobArgument::from(json!("two")),
            JobArgument::from(json!({ "three": [3] })),
        ];
        let payload = serialize_arguments(&args, "friends").unwrap();
        assert_eq!(payload, json!([1, "two", { "three": [3] }]));
    }

    #[test]
    fn test_reserved_key_rejected() {
        let top_level = JobArgument::from(json!({ "_aj_globalid": "gid://friends/Friend/1" }));
        assert!(matches!(
            serialize_arguments(&[top_level], "friends"),
            Err(ArgumentError::ReservedKey(_))
        ));

        let nested = JobArgument::from(json!([{ "inner": { "_aj_globalid": "x" } }]));
        assert!(matches!(
            serialize_arguments(&[nested], "friends"),
            Err(ArgumentError::ReservedKey(_))
        ));
    }

    #[test]
    fn test_deserialize_locates_current_record() {
        let (store, locator, friend) = setup();
        let payload = serialize_arguments(&[friend.clone().into(), json!(5).into()], "friends")
            .unwrap();

        // Changes after enqueue are visible to the job
        store.update_name(friend.id, "johnny").unwrap();

        let args = deserialize_arguments(&payload, &locator).unwrap();
        assert_eq!(args.len(), 2);
        let located = args[0].as_record().unwrap().as_friend().unwrap();
        assert_eq!(located.name, "johnny");
        assert_eq!(args[1].as_value(), Some(&json!(5)));
    }

    #[test]
    fn test_deserialize_missing_record_fails() {
        let (store, locator, friend) = setup();
        let payload = serialize_arguments(&[friend.clone().into()], "friends").unwrap();
        store.delete_friend(friend.id).unwrap();

        let err = deserialize_arguments(&payload, &locator).unwrap_err();
        assert_eq!(
            err,
            JobError::Deserialization(format!("Couldn't find Friend with id={}", friend.id))
        );
    }

    #[test]
    fn test_deserialize_rejects_malformed_payloads() {
        let (_, locator, _) = setup();

        assert!(deserialize_arguments(&json!({ "not": "an array" }), &locator).is_err());
        assert!(deserialize_arguments(&json!([{ "_aj_globalid": 12 }]), &locator).is_err());
        assert!(
            deserialize_arguments(&json!([{ "_aj_globalid": "not-a-gid" }]), &locator).is_err()
        );
    }

    struct UnavailableLocator;

    impl Locator for UnavailableLocator {
        fn app(&self) -> &str {
            "friends"
        }

        fn locate(&self, _gid: &GlobalId) -> Result<Option<Record>, LocateError> {
            Err(anyhow::anyhow!("database is locked").into())
        }
    }

    #[test]
    fn test_storage_failure_while_locating_is_retryable() {
        let payload = json!([{ "_aj_globalid": "gid://friends/Friend/1" }]);

        let err = deserialize_arguments(&payload, &UnavailableLocator).unwrap_err();
        assert_eq!(
            err,
            JobError::ExecutionFailed("Failed to load record: database is locked".to_string())
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_foreign_app_global_id_is_not_retryable() {
        let (_, locator, _) = setup();
        let payload = json!([{ "_aj_globalid": "gid://elsewhere/Friend/1" }]);

        let err = deserialize_arguments(&payload, &locator).unwrap_err();
        assert!(matches!(err, JobError::Deserialization(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_object_with_extra_keys_is_plain_value() {
        let (_, locator, _) = setup();
        let payload = json!([{ "_aj_globalid": "gid://friends/Friend/1", "extra": true }]);

        let args = deserialize_arguments(&payload, &locator).unwrap();
        assert!(args[0].as_value().is_some());
    }
}
