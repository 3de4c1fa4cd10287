use std::net::{IpAddr, Ipv4Addr};

use bon::Builder;
use smol_str::SmolStr;
use url::{Host, Url, form_urlencoded};

use crate::types::OAuthClientMetadata;

pub const DEFAULT_CALLBACK_PATH: &str = "/oauth/callback";
pub const DEFAULT_METADATA_PATH: &str = "/oauth/client-metadata.json";
pub const DEFAULT_SCOPE: &str = "atproto transition:generic";

/// Where the application is reachable and how it presents itself to
/// authorization servers.
///
/// Loopback deployments (`localhost`, `127.0.0.1`, `[::1]`) use the atproto
/// development client id, which needs no published metadata document.
///
/// ```
/// use protoflare_oauth::atproto::ClientConfig;
/// let config = ClientConfig::new("http://localhost:5173/".parse().unwrap()).build();
/// assert_eq!(config.redirect_uri().as_str(), "http://127.0.0.1:5173/oauth/callback");
/// assert!(config.client_id().starts_with("http://localhost/?redirect_uri="));
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct ClientConfig {
    /// Public base URL of the application
    #[builder(start_fn)]
    pub public_url: Url,
    #[builder(into, default = SmolStr::new_static(DEFAULT_CALLBACK_PATH))]
    pub callback_path: SmolStr,
    #[builder(into, default = SmolStr::new_static(DEFAULT_METADATA_PATH))]
    pub metadata_path: SmolStr,
    #[builder(into)]
    pub client_name: Option<SmolStr>,
    pub client_uri: Option<Url>,
    #[builder(into, default = SmolStr::new_static(DEFAULT_SCOPE))]
    pub scope: SmolStr,
}

pub fn is_loopback_host(host: Option<Host<&str>>) -> bool {
    match host {
        Some(Host::Domain(d)) => d == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

impl ClientConfig {
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(self.public_url.host())
    }

    fn loopback_base(&self) -> Url {
        // same port, but always plain http on 127.0.0.1
        let mut base = self.public_url.clone();
        let _ = base.set_scheme("http");
        let _ = base.set_ip_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        base
    }

    /// Where the authorization server sends the user back to
    pub fn redirect_uri(&self) -> Url {
        let base = if self.is_loopback() {
            self.loopback_base()
        } else {
            self.public_url.clone()
        };
        join_path(&base, &self.callback_path)
    }

    /// URL of the published client metadata document
    pub fn metadata_url(&self) -> Url {
        join_path(&self.public_url, &self.metadata_path)
    }

    pub fn client_id(&self) -> SmolStr {
        if !self.is_loopback() {
            return SmolStr::new(self.metadata_url().as_str());
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("redirect_uri", self.redirect_uri().as_str())
            .append_pair("scope", &self.scope)
            .finish();
        smol_str::format_smolstr!("http://localhost/?{query}")
    }

    pub fn client_metadata(&self) -> OAuthClientMetadata {
        OAuthClientMetadata {
            client_id: self.client_id(),
            client_name: self.client_name.clone(),
            client_uri: self.client_uri.clone(),
            redirect_uris: vec![self.redirect_uri()],
            scope: self.scope.clone(),
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            response_types: vec!["code".into()],
            application_type: "web".into(),
            token_endpoint_auth_method: "none".into(),
            dpop_bound_access_tokens: true,
        }
    }
}

/// Replace `base`'s path, query and fragment with `path`
fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_client() {
        let config = ClientConfig::new(Url::parse("https://app.example.com/some/page?x=1").unwrap())
            .client_name("Example")
            .build();
        assert!(!config.is_loopback());
        assert_eq!(
            config.redirect_uri().as_str(),
            "https://app.example.com/oauth/callback"
        );
        assert_eq!(
            config.client_id(),
            "https://app.example.com/oauth/client-metadata.json"
        );
        let metadata = config.client_metadata();
        assert_eq!(metadata.client_name.as_deref(), Some("Example"));
        assert_eq!(metadata.application_type, "web");
        assert!(metadata.dpop_bound_access_tokens);
    }

    #[test]
    fn loopback_client() {
        for host in ["http://localhost:8787", "http://127.0.0.1:8787", "http://[::1]:8787"] {
            let config = ClientConfig::new(Url::parse(host).unwrap()).build();
            assert!(config.is_loopback(), "{host}");
            assert_eq!(
                config.redirect_uri().as_str(),
                "http://127.0.0.1:8787/oauth/callback"
            );
            assert_eq!(
                config.client_id(),
                "http://localhost/?redirect_uri=http%3A%2F%2F127.0.0.1%3A8787%2Foauth%2Fcallback&scope=atproto+transition%3Ageneric"
            );
        }
    }

    #[test]
    fn metadata_document_shape() {
        let config = ClientConfig::new(Url::parse("https://app.example.com").unwrap()).build();
        let json: serde_json::Value =
            serde_json::from_str(&config.client_metadata().to_pretty_json().unwrap()).unwrap();
        assert_eq!(
            json["grant_types"],
            serde_json::json!(["authorization_code", "refresh_token"])
        );
        assert_eq!(json["response_types"], serde_json::json!(["code"]));
        assert_eq!(json["token_endpoint_auth_method"], "none");
        assert_eq!(json["dpop_bound_access_tokens"], true);
        assert!(json.get("client_name").is_none());

        let pairs = config.client_metadata().form_pairs().unwrap();
        assert_eq!(
            pairs
                .iter()
                .filter(|(k, _)| k == "grant_types")
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>(),
            vec!["authorization_code", "refresh_token"]
        );
        assert!(pairs.contains(&("dpop_bound_access_tokens".into(), "true".into())));
    }
}
