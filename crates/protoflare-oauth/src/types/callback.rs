use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::OAuthError;

/// Query parameters the authorization server appends to the redirect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: SmolStr,
    pub iss: SmolStr,
    pub state: SmolStr,
}

#[derive(Deserialize)]
struct RawCallback {
    code: Option<SmolStr>,
    iss: Option<SmolStr>,
    state: Option<SmolStr>,
}

impl CallbackParams {
    /// Parse a callback query string (with or without the leading `?`)
    pub fn from_query(query: &str) -> Result<Self, OAuthError> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let raw: RawCallback = serde_html_form::from_str(query)
            .map_err(|e| OAuthError::state("malformed callback query").with_source(e))?;
        let missing = |name: &str| OAuthError::state(format!("callback is missing `{name}`"));
        Ok(Self {
            code: raw.code.filter(|s| !s.is_empty()).ok_or_else(|| missing("code"))?,
            iss: raw.iss.filter(|s| !s.is_empty()).ok_or_else(|| missing("iss"))?,
            state: raw.state.filter(|s| !s.is_empty()).ok_or_else(|| missing("state"))?,
        })
    }

    /// Parse the query of a full callback URL
    pub fn from_url(url: &url::Url) -> Result<Self, OAuthError> {
        Self::from_query(url.query().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_all_three() {
        let params =
            CallbackParams::from_query("?code=c0de&iss=https%3A%2F%2Fauth.example.com&state=s1")
                .unwrap();
        assert_eq!(params.code, "c0de");
        assert_eq!(params.iss, "https://auth.example.com");
        assert_eq!(params.state, "s1");
    }

    #[test]
    fn missing_parameter_is_a_state_error() {
        let err = CallbackParams::from_query("code=c0de&state=s1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        let err = CallbackParams::from_query("code=&iss=x&state=s1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }
}
