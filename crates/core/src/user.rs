//! Tenant identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted length of a user id.
pub const MAX_USER_ID_LEN: usize = 128;

/// Opaque tenant key.
///
/// User ids double as the last segment of transport topics, so they must not
/// contain topic separators or wildcard characters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create from a string, validating format.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidUserId(
                "user id cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_USER_ID_LEN {
            return Err(crate::Error::InvalidUserId(format!(
                "user id exceeds {MAX_USER_ID_LEN} bytes"
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| matches!(c, '/' | '+' | '#') || c.is_control() || c.is_whitespace())
        {
            return Err(crate::Error::InvalidUserId(format!(
                "invalid character in user id: {c:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({self})")
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
