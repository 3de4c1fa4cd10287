use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use url::Url;

use super::did::Did;
use super::handle::Handle;

/// Service type marking an account's personal data server
pub const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

/// DID document, modelling only the fields the client relies on.
///
/// Everything else is captured in `extra_data` so documents round-trip.
///
/// ```
/// use protoflare_common::types::did_doc::DidDocument;
/// let doc: DidDocument = serde_json::from_value(serde_json::json!({
///   "id": "did:plc:alice",
///   "alsoKnownAs": ["at://alice.example"],
///   "service": [{"id":"#atproto_pds","type":"AtprotoPersonalDataServer","serviceEndpoint":"https://pds.example"}]
/// })).unwrap();
/// assert_eq!(doc.id.as_str(), "did:plc:alice");
/// assert_eq!(doc.pds_endpoint().unwrap().as_str(), "https://pds.example/");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    /// Document identifier
    pub id: Did,

    /// Alternate identifiers for the subject, such as `at://<handle>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_known_as: Vec<String>,

    /// Services associated with this DID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,

    /// Unmodelled fields (verification methods, contexts, ...)
    #[serde(flatten)]
    pub extra_data: BTreeMap<SmolStr, Value>,
}

/// A service entry in a DID document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier, usually a fragment such as `#atproto_pds`
    pub id: SmolStr,
    /// Service type
    #[serde(rename = "type")]
    pub r#type: SmolStr,
    /// Endpoint: a URL string, or a structured object
    #[serde(default)]
    pub service_endpoint: Value,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra_data: BTreeMap<SmolStr, Value>,
}

impl DidDocument {
    /// Validated handles from `alsoKnownAs` entries of the form `at://<handle>`
    pub fn handles(&self) -> Vec<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|s| s.strip_prefix("at://"))
            .filter_map(|h| Handle::new(h).ok())
            .collect()
    }

    /// The first handle the document claims, if any
    pub fn primary_handle(&self) -> Option<Handle> {
        self.handles().into_iter().next()
    }

    /// Endpoint of the first personal data server service with an `https://`
    /// URL string.
    pub fn pds_endpoint(&self) -> Option<Url> {
        self.service.iter().find_map(|s| {
            if s.r#type.as_str() != PDS_SERVICE_TYPE {
                return None;
            }
            let endpoint = s.service_endpoint.as_str()?;
            if !endpoint.starts_with("https://") {
                return None;
            }
            Url::parse(endpoint).ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(services: Value) -> DidDocument {
        serde_json::from_value(json!({
            "@context": ["https://www.w3.org/ns/did/v1"],
            "id": "did:plc:abc123",
            "alsoKnownAs": ["at://alice.example.com", "https://not-a-handle.example"],
            "verificationMethod": [{"id": "did:plc:abc123#atproto", "type": "Multikey"}],
            "service": services,
        }))
        .unwrap()
    }

    #[test]
    fn picks_first_https_pds() {
        let d = doc(json!([
            {"id": "#feed", "type": "BskyFeedGenerator", "serviceEndpoint": "https://feed.example"},
            {"id": "#old", "type": "AtprotoPersonalDataServer", "serviceEndpoint": "http://insecure.example"},
            {"id": "#obj", "type": "AtprotoPersonalDataServer", "serviceEndpoint": {"uri": "https://obj.example"}},
            {"id": "#atproto_pds", "type": "AtprotoPersonalDataServer", "serviceEndpoint": "https://pds.example"},
        ]));
        assert_eq!(d.pds_endpoint().unwrap().as_str(), "https://pds.example/");
    }

    #[test]
    fn no_pds_when_only_insecure() {
        let d = doc(json!([
            {"id": "#atproto_pds", "type": "AtprotoPersonalDataServer", "serviceEndpoint": "http://pds.example"},
        ]));
        assert!(d.pds_endpoint().is_none());
    }

    #[test]
    fn handles_and_extra_fields() {
        let d = doc(json!([]));
        assert_eq!(d.handles(), vec![Handle::new("alice.example.com").unwrap()]);
        assert!(d.extra_data.contains_key("verificationMethod"));
        assert!(d.extra_data.contains_key("@context"));

        let back = serde_json::to_value(&d).unwrap();
        assert_eq!(back["verificationMethod"][0]["type"], "Multikey");
    }
}
