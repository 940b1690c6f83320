//! Global identifiers for records.
//!
//! A global id is a URI of the form `gid://<app>/<ModelName>/<id>` that names
//! a single record independently of the process holding it. Jobs receive
//! records as global ids and resolve them again through a [`Locator`] right
//! before performing.

mod locator;

pub use locator::{LocateError, Locator, Record, StoreLocator, FRIEND_MODEL};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SCHEME_PREFIX: &str = "gid://";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlobalIdError {
    #[error("Not a gid URI: {0}")]
    InvalidScheme(String),

    #[error("Missing app in gid URI: {0}")]
    MissingApp(String),

    #[error("Invalid app name '{0}': only ASCII letters, digits and '-' are allowed")]
    InvalidApp(String),

    #[error("Missing model name in gid URI: {0}")]
    MissingModelName(String),

    #[error("Missing model id in gid URI: {0}")]
    MissingModelId(String),

    #[error("Unexpected path segments in gid URI: {0}")]
    ExtraPathSegments(String),

    #[error("Model id is not valid UTF-8 after decoding: {0}")]
    InvalidModelId(String),
}

/// Identifier of a single record, `gid://<app>/<model_name>/<model_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlobalId {
    app: String,
    model_name: String,
    model_id: String,
}

pub fn validate_app(app: &str) -> Result<(), GlobalIdError> {
    if app.is_empty() {
        return Err(GlobalIdError::MissingApp(app.to_string()));
    }
    if !app.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(GlobalIdError::InvalidApp(app.to_string()));
    }
    Ok(())
}

impl GlobalId {
    pub fn new(
        app: impl Into<String>,
        model_name: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<Self, GlobalIdError> {
        let app = app.into();
        let model_name = model_name.into();
        let model_id = model_id.into();

        validate_app(&app)?;
        if model_name.is_empty() || model_name.contains('/') {
            return Err(GlobalIdError::MissingModelName(model_name));
        }
        if model_id.is_empty() {
            return Err(GlobalIdError::MissingModelId(model_id));
        }
        Ok(Self {
            app,
            model_name,
            model_id,
        })
    }

    pub fn parse(uri: &str) -> Result<Self, GlobalIdError> {
        let rest = uri
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| GlobalIdError::InvalidScheme(uri.to_string()))?;

        let mut segments = rest.split('/');
        let app = segments.next().unwrap_or_default();
        let model_name = segments.next().unwrap_or_default();
        let raw_model_id = segments.next().unwrap_or_default();
        if segments.next().is_some() {
            return Err(GlobalIdError::ExtraPathSegments(uri.to_string()));
        }

        if app.is_empty() {
            return Err(GlobalIdError::MissingApp(uri.to_string()));
        }
        validate_app(app)?;
        if model_name.is_empty() {
            return Err(GlobalIdError::MissingModelName(uri.to_string()));
        }
        if raw_model_id.is_empty() {
            return Err(GlobalIdError::MissingModelId(uri.to_string()));
        }
        let model_id = urlencoding::decode(raw_model_id)
            .map_err(|_| GlobalIdError::InvalidModelId(uri.to_string()))?
            .into_owned();

        Ok(Self {
            app: app.to_string(),
            model_name: model_name.to_string(),
            model_id,
        })
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/{}/{}",
            SCHEME_PREFIX,
            self.app,
            self.model_name,
            urlencoding::encode(&self.model_id)
        )
    }
}

impl FromStr for GlobalId {
    type Err = GlobalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GlobalId {
    type Error = GlobalIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GlobalId> for String {
    fn from(gid: GlobalId) -> Self {
        gid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let gid = GlobalId::new("friends-app", "Friend", "42").unwrap();
        assert_eq!(gid.to_string(), "gid://friends-app/Friend/42");
    }

    #[test]
    fn test_parse() {
        let gid = GlobalId::parse("gid://friends-app/Friend/42").unwrap();
        assert_eq!(gid.app(), "friends-app");
        assert_eq!(gid.model_name(), "Friend");
        assert_eq!(gid.model_id(), "42");
    }

    #[test]
    fn test_model_id_is_percent_encoded() {
        let gid = GlobalId::new("app", "Friend", "a/b c").unwrap();
        let uri = gid.to_string();
        assert_eq!(uri, "gid://app/Friend/a%2Fb%20c");
        assert_eq!(uri.parse::<GlobalId>().unwrap(), gid);
    }

    #[test]
    fn test_rejects_wrong_scheme() {
        assert!(matches!(
            GlobalId::parse("http://app/Friend/1"),
            Err(GlobalIdError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert!(matches!(
            GlobalId::parse("gid://"),
            Err(GlobalIdError::MissingApp(_))
        ));
        assert!(matches!(
            GlobalId::parse("gid://app"),
            Err(GlobalIdError::MissingModelName(_))
        ));
        assert!(matches!(
            GlobalId::parse("gid://app/Friend"),
            Err(GlobalIdError::MissingModelId(_))
        ));
        assert!(matches!(
            GlobalId::parse("gid://app/Friend/"),
            Err(GlobalIdError::MissingModelId(_))
        ));
    }

    #[test]
    fn test_rejects_extra_segments() {
        assert!(matches!(
            GlobalId::parse("gid://app/Friend/1/edit"),
            Err(GlobalIdError::ExtraPathSegments(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_app() {
        assert!(matches!(
            GlobalId::new("my_app", "Friend", "1"),
            Err(GlobalIdError::InvalidApp(_))
        ));
        assert!(matches!(
            GlobalId::parse("gid://my.app/Friend/1"),
            Err(GlobalIdError::InvalidApp(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let gid = GlobalId::new("app", "Friend", "7").unwrap();
        let json = serde_json::to_string(&gid).unwrap();
        assert_eq!(json, "\"gid://app/Friend/7\"");

        let back: GlobalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, gid);
        assert!(serde_json::from_str::<GlobalId>("\"nope\"").is_err());
    }
}
