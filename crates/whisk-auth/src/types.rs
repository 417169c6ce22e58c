//! Token and identity types.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque websocket token binding a connection to a logged-in user.
///
/// `Debug` output is redacted so tokens do not end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WsToken(String);

impl WsToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "WsToken({prefix}…)")
    }
}

impl From<&str> for WsToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A user identity as the hosting application knows it.
///
/// The renewal endpoint may send the user id as a JSON number or string;
/// both deserialize to the same identity and compare as strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from any string-like id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for Identity {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Signed(n) => Self(n.to_string()),
            Raw::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// A renewed token and the identity it was issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
    /// The websocket token.
    pub token: WsToken,
    /// Owner of the token, if the endpoint reported one.
    pub identity: Option<Identity>,
}

impl TokenGrant {
    /// Whether this grant was issued for `expected`.
    ///
    /// A grant without an identity never matches.
    pub fn is_bound_to(&self, expected: Option<&Identity>) -> bool {
        matches!((self.identity.as_ref(), expected), (Some(a), Some(b)) if a == b)
    }
}

/// Wire shape of the renewal response.
#[derive(Debug, Deserialize)]
pub(crate) struct RenewResponse {
    #[serde(default)]
    pub(crate) ws_token: Option<String>,
    #[serde(default)]
    pub(crate) user_id: Option<Identity>,
}
