use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenGrantType {
    AuthorizationCode,
    RefreshToken,
}

#[derive(Serialize, Debug)]
pub struct TokenRequestParameters<'a> {
    pub client_id: &'a str,
    pub code: &'a str,
    pub code_verifier: &'a str,
    pub grant_type: TokenGrantType,
    pub redirect_uri: &'a str,
}

#[derive(Serialize, Debug)]
pub struct RefreshRequestParameters<'a> {
    pub client_id: &'a str,
    pub grant_type: TokenGrantType,
    pub refresh_token: &'a str,
}

/// Authorization request fields appended after the client metadata in a PAR body
#[derive(Serialize, Debug)]
pub struct ParParameters<'a> {
    pub response_type: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'a str,
    pub state: &'a str,
    pub login_hint: &'a str,
}
