use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;

/// PAR lifetime assumed when the server omits `expires_in`
pub const DEFAULT_PAR_EXPIRES_IN: u64 = 60;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthParResponse {
    pub request_uri: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl OAuthParResponse {
    pub fn expires_in(&self) -> u64 {
        self.expires_in.unwrap_or(DEFAULT_PAR_EXPIRES_IN)
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub enum OAuthTokenType {
    #[default]
    DPoP,
    Bearer,
}

// token_type is case-insensitive (RFC 6749 section 5.1)
impl<'de> Deserialize<'de> for OAuthTokenType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = SmolStr::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("dpop") {
            Ok(OAuthTokenType::DPoP)
        } else if raw.eq_ignore_ascii_case("bearer") {
            Ok(OAuthTokenType::Bearer)
        } else {
            Err(serde::de::Error::unknown_variant(&raw, &["DPoP", "Bearer"]))
        }
    }
}

impl OAuthTokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthTokenType::DPoP => "DPoP",
            OAuthTokenType::Bearer => "Bearer",
        }
    }
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.1
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: SmolStr,
    #[serde(default)]
    pub token_type: OAuthTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<SmolStr>,
    // atproto extension: the account DID the token was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<SmolStr>,
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthErrorResponse {
    pub error: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<SmolStr>,
}

impl OAuthErrorResponse {
    pub fn is_invalid_grant(&self) -> bool {
        self.error == "invalid_grant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_minimal() {
        let token: OAuthTokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"DPoP"}"#).unwrap();
        assert_eq!(token.access_token, "at");
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn token_type_is_optional_and_case_insensitive() {
        let token: OAuthTokenResponse = serde_json::from_str(
            r#"{"access_token":"at","refresh_token":"rt","expires_in":3600}"#,
        )
        .unwrap();
        assert_eq!(token.token_type, OAuthTokenType::DPoP);
        assert_eq!(token.expires_in, Some(3600));

        let token: OAuthTokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"dpop"}"#).unwrap();
        assert_eq!(token.token_type, OAuthTokenType::DPoP);
        let token: OAuthTokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"BEARER"}"#).unwrap();
        assert_eq!(token.token_type, OAuthTokenType::Bearer);

        assert!(
            serde_json::from_str::<OAuthTokenResponse>(r#"{"access_token":"at","token_type":"mac"}"#)
                .is_err()
        );
    }

    #[test]
    fn par_default_lifetime() {
        let par: OAuthParResponse =
            serde_json::from_str(r#"{"request_uri":"urn:ietf:params:oauth:request_uri:abc"}"#)
                .unwrap();
        assert_eq!(par.expires_in(), 60);
    }
}
