use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

/// Client metadata document served at the client id URL
/// (<https://atproto.com/specs/oauth#client-id-metadata-document>).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientMetadata {
    pub client_id: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<Url>,
    pub redirect_uris: Vec<Url>,
    pub scope: SmolStr,
    pub grant_types: Vec<SmolStr>,
    pub response_types: Vec<SmolStr>,
    pub application_type: SmolStr,
    pub token_endpoint_auth_method: SmolStr,
    // https://datatracker.ietf.org/doc/html/rfc9449#section-5.2
    pub dpop_bound_access_tokens: bool,
}

impl OAuthClientMetadata {
    /// Every field as form pairs, arrays repeated
    pub fn form_pairs(&self) -> serde_json::Result<Vec<(String, String)>> {
        let serde_json::Value::Object(fields) = serde_json::to_value(self)? else {
            return Ok(Vec::new());
        };
        let mut pairs = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            match value {
                serde_json::Value::Array(items) => {
                    pairs.extend(items.into_iter().map(|v| (key.clone(), scalar(v))))
                }
                other => pairs.push((key, scalar(other))),
            }
        }
        Ok(pairs)
    }

    /// Pretty JSON for serving the document
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn scalar(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
