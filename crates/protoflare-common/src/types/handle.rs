use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;

use super::IdentifierError;

/// A validated AT Protocol handle, e.g. `alice.example.com`.
///
/// Handles are DNS names with at least two labels whose top-level label does not
/// start with a digit. Comparison is case-sensitive; use [`Handle::normalized`]
/// to get the canonical lower-case form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Handle(SmolStr);

/// Regex for handle validation
pub static HANDLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap()
});

/// Maximum length of a handle in bytes
pub const HANDLE_MAX_LEN: usize = 253;

impl Handle {
    /// Fallible constructor, validates.
    ///
    /// Accepts (and strips) a leading `@` or `at://`.
    pub fn new(handle: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let handle = handle.as_ref();
        let handle = handle
            .strip_prefix('@')
            .or_else(|| handle.strip_prefix("at://"))
            .unwrap_or(handle);
        if handle.len() > HANDLE_MAX_LEN {
            Err(IdentifierError::too_long("handle", handle, HANDLE_MAX_LEN))
        } else if !HANDLE_REGEX.is_match(handle) {
            Err(IdentifierError::syntax("handle", handle))
        } else {
            Ok(Self(SmolStr::new(handle)))
        }
    }

    /// Constructor for compile-time literals known to be valid.
    ///
    /// Panics on invalid input.
    pub fn new_static(handle: &'static str) -> Self {
        match Self::new(handle) {
            Ok(handle) => handle,
            Err(e) => panic!("invalid static handle {handle:?}: {e}"),
        }
    }

    /// Lower-cased copy of this handle
    pub fn normalized(&self) -> Self {
        Self(SmolStr::new(self.0.to_ascii_lowercase()))
    }

    /// The handle as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: std::borrow::Cow<'de, str> = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Handle> for String {
    fn from(value: Handle) -> Self {
        value.0.to_string()
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Handle {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_handles() {
        for ok in [
            "alice.example.com",
            "jay.bsky.social",
            "8.cn",
            "name.t--t",
            "XX.LCS.MIT.EDU",
            "a.co",
            "xn--notarealidn.com",
        ] {
            assert!(Handle::new(ok).is_ok(), "{ok:?}");
        }
    }

    #[test]
    fn strips_prefixes() {
        assert_eq!(Handle::new("@alice.example.com").unwrap().as_str(), "alice.example.com");
        assert_eq!(Handle::new("at://alice.example.com").unwrap().as_str(), "alice.example.com");
    }

    #[test]
    fn invalid_handles() {
        for bad in [
            "alice",
            "alice.",
            ".alice.com",
            "alice..com",
            "-alice.com",
            "alice-.com",
            "alice.com-",
            "alice.123",
            "al ice.com",
            "did:plc:abc",
            "",
        ] {
            assert!(Handle::new(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn length_limit() {
        let label = "a".repeat(63);
        let long = format!("{label}.{label}.{label}.{label}.com");
        assert!(long.len() > HANDLE_MAX_LEN);
        assert!(Handle::new(&long).is_err());
    }

    #[test]
    fn normalized_lowercases() {
        let h = Handle::new("Alice.Example.COM").unwrap();
        assert_eq!(h.normalized().as_str(), "alice.example.com");
    }
}
