//! Identity resolution: handle → DID, DID → document, document → authorization server.
//!
//! Handle resolution races every configured [`HandleStep`] and keeps the first
//! success. DID documents come from a single authoritative source per method.
//! The authorization server is found through the PDS's protected resource
//! metadata.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bon::Builder;
use http::StatusCode;
use miette::Diagnostic;
use protoflare_common::error::TransportError;
use protoflare_common::types::IdentifierError;
use protoflare_common::{AtIdentifier, Did, DidDocument, Handle};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during identity resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    /// Input or resolved value is not a valid handle/DID
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identifier(#[from] IdentifierError),

    /// A single handle lookup strategy failed
    #[error("{step} lookup failed: {reason}")]
    #[diagnostic(code(protoflare_identity::lookup))]
    Lookup {
        /// Strategy that failed
        step: HandleStep,
        /// What went wrong
        reason: SmolStr,
    },

    /// Every handle lookup strategy failed
    #[error("failed to resolve DID for handle {handle}")]
    #[diagnostic(
        code(protoflare_identity::handle_resolution),
        help("check the handle's `_atproto` TXT record or `/.well-known/atproto-did` document")
    )]
    HandleResolution {
        /// Handle being resolved
        handle: Handle,
        /// One failure per strategy, in completion order
        #[related]
        causes: Vec<IdentityError>,
    },

    /// The DID method has no supported document source
    #[error("unsupported DID method: {0}")]
    #[diagnostic(
        code(protoflare_identity::unsupported_did_method),
        help("supported DID methods: did:plc, did:web")
    )]
    UnsupportedDidMethod(Did),

    /// The DID document could not be fetched or parsed
    #[error("failed to resolve DID document for {did}: {reason}")]
    #[diagnostic(code(protoflare_identity::did_document))]
    DidDocument {
        /// DID being resolved
        did: Did,
        /// What went wrong
        reason: SmolStr,
    },

    /// The fetched document describes a different DID
    #[error("DID document id mismatch: expected {expected}, found {found}")]
    #[diagnostic(
        code(protoflare_identity::doc_id_mismatch),
        help("document id differs from requested DID; do not trust this document")
    )]
    DocIdMismatch {
        /// DID that was requested
        expected: Did,
        /// DID the document claims
        found: Did,
    },

    /// No `AtprotoPersonalDataServer` service with an `https://` endpoint
    #[error("unable to find AtprotoPersonalDataServer service for {did}")]
    #[diagnostic(
        code(protoflare_identity::missing_pds_endpoint),
        help("the account's DID document must list an https personal data server")
    )]
    MissingPdsEndpoint {
        /// DID whose document lacks a PDS
        did: Did,
    },

    /// The PDS protected resource metadata is unreachable or malformed
    #[error("failed to resolve OAuth protected resource metadata from {pds}: {reason}")]
    #[diagnostic(code(protoflare_identity::protected_resource_metadata))]
    ProtectedResourceMetadata {
        /// PDS whose metadata was requested
        pds: Url,
        /// What went wrong
        reason: SmolStr,
    },

    /// The PDS does not advertise an https authorization server
    #[error("unable to find authorization server for {pds}")]
    #[diagnostic(
        code(protoflare_identity::no_authorization_server),
        help("the PDS must list an https entry in `authorization_servers`")
    )]
    NoAuthorizationServer {
        /// PDS whose metadata lacks a usable entry
        pds: Url,
    },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    #[diagnostic(code(protoflare_identity::transport))]
    Transport(#[from] TransportError),

    /// URL construction failure
    #[error("URL parse error: {0}")]
    #[diagnostic(code(protoflare_identity::url))]
    Url(#[from] url::ParseError),
}

impl From<http::Error> for IdentityError {
    fn from(e: http::Error) -> Self {
        Self::Transport(TransportError::from(e))
    }
}

impl IdentityError {
    pub(crate) fn lookup(step: HandleStep, reason: impl fmt::Display) -> Self {
        Self::Lookup {
            step,
            reason: smol_str::format_smolstr!("{reason}"),
        }
    }

    pub(crate) fn did_document(did: &Did, reason: impl fmt::Display) -> Self {
        Self::DidDocument {
            did: did.clone(),
            reason: smol_str::format_smolstr!("{reason}"),
        }
    }

    /// Whether the failure was caused by caller cancellation.
    ///
    /// A failed handle race counts as cancelled only when every strategy was.
    pub fn is_cancelled(&self) -> bool {
        match self {
            IdentityError::Transport(t) => t.is_cancelled(),
            IdentityError::HandleResolution { causes, .. } => {
                !causes.is_empty() && causes.iter().all(IdentityError::is_cancelled)
            }
            _ => false,
        }
    }

    /// Whether the account or its servers are set up in a way the client cannot use
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            IdentityError::MissingPdsEndpoint { .. } | IdentityError::NoAuthorizationServer { .. }
        )
    }

    /// Whether retrying later might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IdentityError::Transport(t) => !t.is_cancelled(),
            IdentityError::HandleResolution { causes, .. } => {
                causes.iter().any(IdentityError::is_transient)
            }
            _ => false,
        }
    }
}

/// Result alias for identity resolution
pub type Result<T> = core::result::Result<T, IdentityError>;

/// Handle → DID lookup strategy. All configured strategies run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandleStep {
    /// DNS TXT record `_atproto.<handle>` via a DNS-over-HTTPS JSON endpoint
    DnsOverHttps,
    /// HTTPS GET `https://<handle>/.well-known/atproto-did`
    HttpsWellKnown,
    /// XRPC `com.atproto.identity.resolveHandle` against a resolver service
    ResolverService,
}

impl HandleStep {
    /// All strategies, in their default order
    pub const ALL: [HandleStep; 3] = [
        HandleStep::DnsOverHttps,
        HandleStep::HttpsWellKnown,
        HandleStep::ResolverService,
    ];
}

impl fmt::Display for HandleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleStep::DnsOverHttps => "DNS",
            HandleStep::HttpsWellKnown => ".well-known",
            HandleStep::ResolverService => "resolver service",
        })
    }
}

fn default_doh_endpoint() -> Url {
    Url::parse("https://cloudflare-dns.com/dns-query").expect("valid url")
}

fn default_handle_resolver() -> Url {
    Url::parse("https://api.bsky.app/").expect("valid url")
}

fn default_plc_directory() -> Url {
    Url::parse("https://plc.directory/").expect("valid url")
}

/// Configurable resolver options.
///
/// ```
/// use protoflare_identity::resolver::{HandleStep, ResolverOptions};
/// let opts = ResolverOptions::new()
///     .handle_steps(vec![HandleStep::DnsOverHttps, HandleStep::HttpsWellKnown])
///     .build();
/// assert!(opts.validate_doc_id);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct ResolverOptions {
    /// DNS-over-HTTPS JSON endpoint used for `_atproto` TXT lookups
    #[builder(default = default_doh_endpoint())]
    pub doh_endpoint: Url,
    /// Base URL of the service answering `com.atproto.identity.resolveHandle`
    #[builder(default = default_handle_resolver())]
    pub handle_resolver: Url,
    /// PLC directory serving `did:plc` documents
    #[builder(default = default_plc_directory())]
    pub plc_directory: Url,
    /// Strategies raced for handle → DID resolution
    #[builder(default = HandleStep::ALL.to_vec())]
    pub handle_steps: Vec<HandleStep>,
    /// Reject documents whose `id` differs from the requested DID
    #[builder(default = true)]
    pub validate_doc_id: bool,
    /// Cache hint attached to document and metadata fetches
    #[builder(default = Duration::from_secs(300))]
    pub cache_max_age: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::new().build()
    }
}

/// OAuth protected resource metadata published by a PDS
/// (`/.well-known/oauth-protected-resource`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OAuthProtectedResourceMetadata {
    /// Resource identifier
    #[serde(default)]
    pub resource: Option<SmolStr>,
    /// Authorization servers able to issue tokens for this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Supported scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<SmolStr>>,
    /// Supported bearer methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<SmolStr>>,
    /// Human-readable documentation URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
}

impl OAuthProtectedResourceMetadata {
    /// The first authorization server with an `https://` URL
    pub fn https_authorization_server(&self) -> Option<Url> {
        self.authorization_servers
            .iter()
            .filter(|s| s.starts_with("https://"))
            .find_map(|s| Url::parse(s).ok())
    }
}

/// Where an account's data and credentials live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    /// Personal data server hosting the account
    pub pds: Url,
    /// Authorization server issuing tokens for that PDS
    pub authorization_server: Url,
}

/// Everything the OAuth flow needs to know about an account
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    /// The account's DID
    pub did: Did,
    /// The handle used to log in, or the document's primary handle
    pub handle: Option<Handle>,
    /// The account's DID document
    pub document: DidDocument,
    /// PDS and authorization server
    pub endpoints: ServiceEndpoints,
}

impl ResolvedIdentity {
    /// The handle as text, falling back to the DID when the account has none
    pub fn display_handle(&self) -> &str {
        self.handle
            .as_ref()
            .map(Handle::as_str)
            .unwrap_or_else(|| self.did.as_str())
    }
}

/// Trait for identity resolution, for pluggable implementations.
pub trait IdentityResolver {
    /// Access options for validation decisions in default methods
    fn options(&self) -> &ResolverOptions;

    /// Resolve a handle to a syntax-checked DID
    fn resolve_handle(&self, handle: &Handle) -> impl Future<Output = Result<Did>> + Send
    where
        Self: Sync;

    /// Fetch and parse the DID document for `did`
    fn resolve_did_doc(&self, did: &Did) -> impl Future<Output = Result<DidDocument>> + Send
    where
        Self: Sync;

    /// Fetch the protected resource metadata published by `pds`
    fn resolve_protected_resource(
        &self,
        pds: &Url,
    ) -> impl Future<Output = Result<OAuthProtectedResourceMetadata>> + Send
    where
        Self: Sync;

    /// Find the PDS in `doc` and the authorization server it delegates to
    fn resolve_authorization_server(
        &self,
        doc: &DidDocument,
    ) -> impl Future<Output = Result<ServiceEndpoints>> + Send
    where
        Self: Sync,
    {
        async move {
            let pds = doc
                .pds_endpoint()
                .ok_or_else(|| IdentityError::MissingPdsEndpoint { did: doc.id.clone() })?;
            let metadata = self.resolve_protected_resource(&pds).await?;
            let authorization_server = metadata
                .https_authorization_server()
                .ok_or_else(|| IdentityError::NoAuthorizationServer { pds: pds.clone() })?;
            Ok(ServiceEndpoints {
                pds,
                authorization_server,
            })
        }
    }

    /// Resolve a handle or DID all the way to its authorization server
    fn resolve_identity(
        &self,
        ident: &AtIdentifier,
    ) -> impl Future<Output = Result<ResolvedIdentity>> + Send
    where
        Self: Sync,
    {
        async move {
            let (did, handle) = match ident {
                AtIdentifier::Handle(handle) => {
                    (self.resolve_handle(handle).await?, Some(handle.clone()))
                }
                AtIdentifier::Did(did) => (did.clone(), None),
            };
            let document = self.resolve_did_doc(&did).await?;
            let endpoints = self.resolve_authorization_server(&document).await?;
            let handle = handle.or_else(|| document.primary_handle());
            Ok(ResolvedIdentity {
                did,
                handle,
                document,
                endpoints,
            })
        }
    }
}

impl<T: IdentityResolver + Sync + Send> IdentityResolver for std::sync::Arc<T> {
    fn options(&self) -> &ResolverOptions {
        self.as_ref().options()
    }

    async fn resolve_handle(&self, handle: &Handle) -> Result<Did> {
        self.as_ref().resolve_handle(handle).await
    }

    async fn resolve_did_doc(&self, did: &Did) -> Result<DidDocument> {
        self.as_ref().resolve_did_doc(did).await
    }

    async fn resolve_protected_resource(
        &self,
        pds: &Url,
    ) -> Result<OAuthProtectedResourceMetadata> {
        self.as_ref().resolve_protected_resource(pds).await
    }
}

/// Map an HTTP status to a short reason string
pub(crate) fn status_reason(status: StatusCode) -> SmolStr {
    smol_str::format_smolstr!("HTTP {status}")
}
