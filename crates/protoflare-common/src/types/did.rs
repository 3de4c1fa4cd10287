use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;

use super::IdentifierError;

/// A validated decentralized identifier, e.g. `did:plc:abc123`.
///
/// Validation is purely syntactic: a lower-case method, a method-specific id of
/// `[a-zA-Z0-9._:%-]` that does not end in `:` or `%`, and at most 2048 bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

/// Regex for DID validation.
///
/// `%` is allowed inside the identifier but well-formedness of percent
/// escapes is not checked.
pub static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

/// Maximum length of a DID in bytes
pub const DID_MAX_LEN: usize = 2048;

impl Did {
    /// Fallible constructor, validates.
    ///
    /// Accepts (and strips) a leading `at://`.
    pub fn new(did: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let did = did.as_ref();
        let did = did.strip_prefix("at://").unwrap_or(did);
        if did.len() > DID_MAX_LEN {
            Err(IdentifierError::too_long("did", did, DID_MAX_LEN))
        } else if !DID_REGEX.is_match(did) {
            Err(IdentifierError::syntax("did", did))
        } else {
            Ok(Self(SmolStr::new(did)))
        }
    }

    /// Constructor for compile-time literals known to be valid.
    ///
    /// Panics on invalid input.
    pub fn new_static(did: &'static str) -> Self {
        match Self::new(did) {
            Ok(did) => did,
            Err(e) => panic!("invalid static DID {did:?}: {e}"),
        }
    }

    /// The DID method, e.g. `plc` for `did:plc:abc123`
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Everything after `did:<method>:`
    pub fn method_specific_id(&self) -> &str {
        self.0
            .splitn(3, ':')
            .nth(2)
            .unwrap_or_default()
    }

    /// The DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Did {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: std::borrow::Cow<'de, str> = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.0)
    }
}

impl From<Did> for String {
    fn from(value: Did) -> Self {
        value.0.to_string()
    }
}

impl From<Did> for SmolStr {
    fn from(value: Did) -> Self {
        value.0
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Did {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
