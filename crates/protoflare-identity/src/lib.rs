//! Identity resolution for the AT Protocol
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use protoflare_common::AtIdentifier;
//! use protoflare_identity::ProtoflareResolver;
//! use protoflare_identity::resolver::IdentityResolver;
//!
//! let resolver = ProtoflareResolver::default();
//! let ident = AtIdentifier::new("alice.bsky.social")?;
//! let resolved = resolver.resolve_identity(&ident).await?;
//! println!("{} lives on {}", resolved.did, resolved.endpoints.pds);
//! # Ok(())
//! # }
//! ```
//!
//! ## Handle → DID
//!
//! All configured strategies run concurrently and the first valid answer wins;
//! the others are dropped:
//!
//! 1. DNS TXT record at `_atproto.{handle}`, queried over DNS-over-HTTPS
//! 2. HTTPS well-known at `https://{handle}/.well-known/atproto-did`
//! 3. `com.atproto.identity.resolveHandle` on a resolver service
//!
//! ## DID → document
//!
//! 1. `did:plc` from the PLC directory
//! 2. `did:web` from the domain's HTTPS well-known
//!
//! Any other method fails with [`IdentityError::UnsupportedDidMethod`].

#![warn(missing_docs)]

/// Concurrent first-success helper
pub mod race;
/// Resolver trait, options and errors
pub mod resolver;

use http::header::{ACCEPT, CACHE_CONTROL};
use http::{Method, Request};
use percent_encoding::percent_decode_str;
use protoflare_common::error::TransportError;
use protoflare_common::http_client::HttpClient;
use protoflare_common::{Did, DidDocument, Handle};
use serde::Deserialize;
use smol_str::SmolStr;
use url::{ParseError, Url};

pub use race::{AggregateError, first_success};
pub use resolver::{
    HandleStep, IdentityError, IdentityResolver, OAuthProtectedResourceMetadata, ResolvedIdentity,
    ResolverOptions, ServiceEndpoints,
};

use resolver::status_reason;

/// DNS record type number for TXT
const DNS_TYPE_TXT: u64 = 16;

/// Default resolver over any [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ProtoflareResolver<C = reqwest::Client> {
    http: C,
    opts: ResolverOptions,
}

impl<C> ProtoflareResolver<C> {
    /// Create a resolver using `http` for every lookup
    pub fn new(http: C, opts: ResolverOptions) -> Self {
        Self { http, opts }
    }

    /// The underlying HTTP client
    pub fn http(&self) -> &C {
        &self.http
    }

    /// Enable/disable doc id validation
    pub fn with_validate_doc_id(mut self, enable: bool) -> Self {
        self.opts.validate_doc_id = enable;
        self
    }

    /// Construct the well-known HTTPS URL for a `did:web` DID.
    ///
    /// - `did:web:example.com` → `https://example.com/.well-known/did.json`
    /// - `did:web:example.com:user:alice` → `https://example.com/user/alice/did.json`
    fn did_web_url(&self, did: &Did) -> resolver::Result<Url> {
        let mut parts = did.method_specific_id().split(':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IdentityError::did_document(did, "missing did:web host"))?;
        // a port is encoded as %3A in the host segment
        let host = percent_decode_str(host).decode_utf8_lossy();
        let mut url = Url::parse(&format!("https://{host}/"))?;
        let path: Vec<&str> = parts.collect();
        if path.is_empty() {
            url.set_path(".well-known/did.json");
        } else {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| IdentityError::Url(ParseError::SetHostOnCannotBeABaseUrl))?;
            for seg in path {
                segments.push(&percent_decode_str(seg).decode_utf8_lossy());
            }
            segments.push("did.json");
        }
        Ok(url)
    }

    fn did_plc_url(&self, did: &Did) -> resolver::Result<Url> {
        // Url::join would treat the colons in the DID as a scheme
        let base = self.opts.plc_directory.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{did}"))?)
    }

    fn doh_url(&self, handle: &Handle) -> Url {
        let mut url = self.opts.doh_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("name", &format!("_atproto.{handle}"))
            .append_pair("type", "TXT");
        url
    }

    fn resolve_handle_url(&self, handle: &Handle) -> resolver::Result<Url> {
        let mut url = self
            .opts
            .handle_resolver
            .join("xrpc/com.atproto.identity.resolveHandle")?;
        url.query_pairs_mut().append_pair("handle", handle.as_str());
        Ok(url)
    }
}

impl Default for ProtoflareResolver<reqwest::Client> {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), ResolverOptions::default())
    }
}

#[derive(Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Deserialize)]
struct DohAnswer {
    name: String,
    #[serde(rename = "type")]
    kind: u64,
    data: String,
}

#[derive(Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

/// Extract the `did=` value of the first matching TXT answer
fn parse_doh_answer(body: &[u8], name: &str) -> Result<SmolStr, SmolStr> {
    let response: DohResponse =
        serde_json::from_slice(body).map_err(|e| smol_str::format_smolstr!("bad DoH body: {e}"))?;
    let want = name.trim_end_matches('.');
    response
        .answer
        .iter()
        .filter(|a| a.kind == DNS_TYPE_TXT && a.name.trim_end_matches('.') == want)
        .map(|a| a.data.replace('"', ""))
        .find_map(|txt| txt.trim().strip_prefix("did=").map(SmolStr::new))
        .ok_or_else(|| SmolStr::new_static("no did= TXT record"))
}

/// The whole `/.well-known/atproto-did` body, surrounding whitespace trimmed
fn parse_well_known_body(body: &[u8]) -> Result<SmolStr, SmolStr> {
    let text = String::from_utf8_lossy(body);
    let did = text.trim();
    if did.is_empty() {
        return Err(SmolStr::new_static("empty well-known document"));
    }
    if did.contains(char::is_whitespace) {
        return Err(SmolStr::new_static("well-known document holds more than a DID"));
    }
    Ok(SmolStr::new(did))
}

impl<C: HttpClient> ProtoflareResolver<C> {
    async fn get(
        &self,
        url: &Url,
        accept: &str,
        cache: bool,
    ) -> resolver::Result<http::Response<Vec<u8>>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(ACCEPT, accept);
        if cache {
            builder = builder.header(
                CACHE_CONTROL,
                format!("max-age={}", self.opts.cache_max_age.as_secs()),
            );
        }
        let request = builder.body(Vec::new())?;
        self.http
            .send_http(request)
            .await
            .map_err(|e| IdentityError::Transport(TransportError::from_client_error(e)))
    }

    /// Run one handle lookup strategy, returning the unvalidated DID text
    async fn lookup(&self, step: HandleStep, handle: &Handle) -> resolver::Result<SmolStr> {
        let (url, accept) = match step {
            HandleStep::DnsOverHttps => (self.doh_url(handle), "application/dns-json"),
            HandleStep::HttpsWellKnown => (
                Url::parse(&format!("https://{handle}/.well-known/atproto-did"))?,
                "text/plain",
            ),
            HandleStep::ResolverService => (self.resolve_handle_url(handle)?, "application/json"),
        };
        let response = self.get(&url, accept, false).await?;
        if !response.status().is_success() {
            return Err(IdentityError::lookup(step, status_reason(response.status())));
        }
        let body = response.body();
        let parsed = match step {
            HandleStep::DnsOverHttps => parse_doh_answer(body, &format!("_atproto.{handle}")),
            HandleStep::HttpsWellKnown => parse_well_known_body(body),
            HandleStep::ResolverService => serde_json::from_slice::<ResolveHandleOutput>(body)
                .map(|out| SmolStr::new(out.did))
                .map_err(|e| smol_str::format_smolstr!("bad resolveHandle body: {e}")),
        };
        let value = parsed.map_err(|reason| IdentityError::lookup(step, reason))?;
        #[cfg(feature = "tracing")]
        tracing::debug!(%step, did = %value, "handle lookup succeeded");
        Ok(value)
    }
}

impl<C: HttpClient + Sync> IdentityResolver for ProtoflareResolver<C> {
    fn options(&self) -> &ResolverOptions {
        &self.opts
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(handle = %handle)))]
    async fn resolve_handle(&self, handle: &Handle) -> resolver::Result<Did> {
        let attempts = self
            .opts
            .handle_steps
            .iter()
            .map(|step| self.lookup(*step, handle));
        match first_success(attempts).await {
            Ok(did) => Ok(Did::new(did.as_str())?),
            Err(failed) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %failed, "every handle lookup failed");
                Err(IdentityError::HandleResolution {
                    handle: handle.clone(),
                    causes: failed.into_errors(),
                })
            }
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(did = %did)))]
    async fn resolve_did_doc(&self, did: &Did) -> resolver::Result<DidDocument> {
        let url = match did.method() {
            "plc" => self.did_plc_url(did)?,
            "web" => self.did_web_url(did)?,
            _ => return Err(IdentityError::UnsupportedDidMethod(did.clone())),
        };
        let response = self.get(&url, "application/json", true).await?;
        if !response.status().is_success() {
            return Err(IdentityError::did_document(did, status_reason(response.status())));
        }
        let doc: DidDocument = serde_json::from_slice(response.body())
            .map_err(|e| IdentityError::did_document(did, e))?;
        if self.opts.validate_doc_id && doc.id != *did {
            return Err(IdentityError::DocIdMismatch {
                expected: did.clone(),
                found: doc.id,
            });
        }
        Ok(doc)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(pds = %pds)))]
    async fn resolve_protected_resource(
        &self,
        pds: &Url,
    ) -> resolver::Result<OAuthProtectedResourceMetadata> {
        let url = pds.join("/.well-known/oauth-protected-resource")?;
        let metadata_error = |reason: SmolStr| IdentityError::ProtectedResourceMetadata {
            pds: pds.clone(),
            reason,
        };
        let response = self.get(&url, "application/json", true).await?;
        if !response.status().is_success() {
            return Err(metadata_error(status_reason(response.status())));
        }
        serde_json::from_slice(response.body())
            .map_err(|e| metadata_error(smol_str::format_smolstr!("{e}")))
    }
}
