//! Validated identifier newtypes shared across the discovery state layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound applied to every identifier accepted by the layer.
pub const MAX_KEY_LEN: usize = 128;

/// Errors raised while validating cluster, service, or endpoint identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Identifier was empty.
    #[error("identifier must not be empty")]
    Empty,
    /// Identifier exceeded [`MAX_KEY_LEN`] characters.
    #[error("identifier '{0}' exceeds {MAX_KEY_LEN} characters")]
    TooLong(String),
    /// Identifier contained a character outside the accepted set.
    #[error("identifier '{key}' contains unsupported character {ch:?}")]
    UnsupportedCharacter {
        /// Identifier that failed validation.
        key: String,
        /// First offending character.
        ch: char,
    },
}

fn validate_key(raw: &str) -> Result<(), KeyError> {
    if raw.is_empty() {
        return Err(KeyError::Empty);
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong(raw.to_string()));
    }
    if let Some(ch) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(KeyError::UnsupportedCharacter {
            key: raw.to_string(),
            ch,
        });
    }
    Ok(())
}

fn validate_address(raw: &str) -> Result<(), KeyError> {
    if raw.is_empty() {
        return Err(KeyError::Empty);
    }
    if raw.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong(raw.to_string()));
    }
    if let Some(ch) = raw.chars().find(|c| c.is_whitespace() || *c == '/') {
        return Err(KeyError::UnsupportedCharacter {
            key: raw.to_string(),
            ch,
        });
    }
    Ok(())
}

macro_rules! key_impls {
    ($ty:ident) => {
        impl $ty {
            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = KeyError;

            fn try_from(raw: &str) -> Result<Self, Self::Error> {
                Self::try_from(raw.to_string())
            }
        }

        impl From<$ty> for String {
            fn from(key: $ty) -> Self {
                key.0
            }
        }
    };
}

/// Identifier for a cluster: a physical/logical group of endpoints backing
/// one or more services.
///
/// Keys are restricted to `[A-Za-z0-9._-]` so they remain safe to use as
/// snapshot file names in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterKey(String);

impl TryFrom<String> for ClusterKey {
    type Error = KeyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        validate_key(&raw)?;
        Ok(Self(raw))
    }
}

key_impls!(ClusterKey);

/// Identifier for a logical service consumed by clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKey(String);

impl TryFrom<String> for ServiceKey {
    type Error = KeyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        validate_key(&raw)?;
        Ok(Self(raw))
    }
}

key_impls!(ServiceKey);

/// Network address of a single endpoint (`host:port` or any opaque routable
/// form the transport layer understands).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointAddr(String);

impl TryFrom<String> for EndpointAddr {
    type Error = KeyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        validate_address(&raw)?;
        Ok(Self(raw))
    }
}

key_impls!(EndpointAddr);
