use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::IdentifierError;
use super::did::Did;
use super::handle::Handle;

/// An account identifier as typed by a user: either a handle or a DID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AtIdentifier {
    /// DID variant
    Did(Did),
    /// Handle variant
    Handle(Handle),
}

impl AtIdentifier {
    /// Parse a handle or DID. Anything starting with `did:` must be a valid DID.
    pub fn new(ident: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let ident = ident.as_ref().trim();
        let bare = ident.strip_prefix("at://").unwrap_or(ident);
        if bare.starts_with("did:") {
            Did::new(bare).map(Self::Did)
        } else {
            Handle::new(bare).map(Self::Handle)
        }
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        match self {
            AtIdentifier::Did(did) => did.as_str(),
            AtIdentifier::Handle(handle) => handle.as_str(),
        }
    }
}

impl FromStr for AtIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<Did> for AtIdentifier {
    fn from(value: Did) -> Self {
        Self::Did(value)
    }
}

impl From<Handle> for AtIdentifier {
    fn from(value: Handle) -> Self {
        Self::Handle(value)
    }
}

impl fmt::Display for AtIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_either_kind() {
        assert!(matches!(
            AtIdentifier::new("did:plc:abc123").unwrap(),
            AtIdentifier::Did(_)
        ));
        assert!(matches!(
            AtIdentifier::new("@alice.example.com").unwrap(),
            AtIdentifier::Handle(h) if h.as_str() == "alice.example.com"
        ));
        assert!(matches!(
            AtIdentifier::new("at://did:web:example.com").unwrap(),
            AtIdentifier::Did(d) if d.as_str() == "did:web:example.com"
        ));
    }

    #[test]
    fn invalid_did_is_not_retried_as_handle() {
        let err = AtIdentifier::new("did:plc:").unwrap_err();
        assert_eq!(err.spec.as_str(), "did");
    }
}
