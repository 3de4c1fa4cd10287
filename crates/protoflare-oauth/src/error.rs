use http::StatusCode;
use miette::Diagnostic;
use protoflare_common::error::{BoxError, StoreError, TransportError};
use protoflare_identity::IdentityError;
use smol_str::SmolStr;

use crate::keys::KeyError;

/// Error categories for the OAuth client
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Diagnostic)]
pub enum ErrorKind {
    /// Handle, DID document or authorization server could not be resolved
    #[error("identity resolution failed")]
    #[diagnostic(
        code(protoflare_oauth::resolution),
        help("check the handle/DID and that the account's PDS advertises an https authorization server")
    )]
    Resolution,

    /// DPoP nonce negotiation failed
    #[error("DPoP nonce error")]
    #[diagnostic(
        code(protoflare_oauth::nonce),
        help("the server did not provide a usable `DPoP-Nonce`")
    )]
    Nonce,

    /// Pending authorization missing, expired or inconsistent
    #[error("authorization state error")]
    #[diagnostic(
        code(protoflare_oauth::state),
        help("restart the login; authorization state is single-use and short-lived")
    )]
    State,

    /// Stored credentials are missing or no longer accepted
    #[error("credential error")]
    #[diagnostic(code(protoflare_oauth::credential), help("log in again"))]
    Credential,

    /// The server answered with an error or an unexpected response
    #[error("OAuth protocol error")]
    #[diagnostic(
        code(protoflare_oauth::protocol),
        help("see server response for details")
    )]
    Protocol,

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    #[diagnostic(code(protoflare_oauth::cancelled))]
    Cancelled,

    /// The credential store failed
    #[error("credential storage error")]
    #[diagnostic(
        code(protoflare_oauth::storage),
        help("verify the credential store is accessible and writable")
    )]
    Storage,

    /// DPoP key material could not be created or restored
    #[error("DPoP key error")]
    #[diagnostic(code(protoflare_oauth::key))]
    Key,
}

/// OAuth client error: a kind, an optional cause and some context
#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{kind}{}", .context.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct OAuthError {
    #[diagnostic_source]
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<SmolStr>,
    context: Option<SmolStr>,
}

impl OAuthError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: ErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    fn with_kind(kind: ErrorKind, context: impl Into<SmolStr>) -> Self {
        Self::new(kind, None).with_context(context)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn source_err(&self) -> Option<&BoxError> {
        self.source.as_ref()
    }

    pub fn with_help(mut self, help: impl Into<SmolStr>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<SmolStr>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn resolution(source: IdentityError) -> Self {
        Self::from(source)
    }

    pub fn nonce(context: impl Into<SmolStr>) -> Self {
        Self::with_kind(ErrorKind::Nonce, context)
    }

    pub fn state(context: impl Into<SmolStr>) -> Self {
        Self::with_kind(ErrorKind::State, context)
    }

    pub fn credential(context: impl Into<SmolStr>) -> Self {
        Self::with_kind(ErrorKind::Credential, context)
    }

    pub fn protocol(context: impl Into<SmolStr>) -> Self {
        Self::with_kind(ErrorKind::Protocol, context)
    }

    /// Protocol error for an unexpected HTTP status, keeping the body for diagnosis
    pub fn http_status(what: &str, status: StatusCode, body: &[u8]) -> Self {
        let body = String::from_utf8_lossy(body);
        let body = body.trim();
        if body.is_empty() {
            Self::protocol(smol_str::format_smolstr!("{what}: HTTP {status}"))
        } else {
            Self::protocol(smol_str::format_smolstr!("{what}: HTTP {status}: {body}"))
        }
    }

    /// Storage error for a failed store operation
    pub fn storage(source: StoreError) -> Self {
        Self::from(source)
    }

    /// Cancelled or related to a cancelled request
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, Some(Box::new(TransportError::Cancelled)))
    }

    fn identity_source(&self) -> Option<&IdentityError> {
        self.source.as_deref()?.downcast_ref::<IdentityError>()
    }

    /// The user has to log in again for this to go away
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self.kind, ErrorKind::Credential | ErrorKind::State)
    }

    /// Retrying later might succeed
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ErrorKind::Protocol | ErrorKind::Storage | ErrorKind::Cancelled => true,
            ErrorKind::Resolution => self
                .identity_source()
                .is_some_and(IdentityError::is_transient),
            _ => false,
        }
    }

    /// The account or its servers are set up in a way this client cannot use
    pub fn is_misconfiguration(&self) -> bool {
        self.kind == ErrorKind::Resolution
            && self
                .identity_source()
                .is_some_and(IdentityError::is_misconfiguration)
    }
}

impl From<ErrorKind> for OAuthError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, None)
    }
}

impl From<IdentityError> for OAuthError {
    fn from(e: IdentityError) -> Self {
        if e.is_cancelled() {
            return Self::new(ErrorKind::Cancelled, Some(Box::new(e)));
        }
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Resolution, Some(Box::new(e))).with_context(msg)
    }
}

impl From<TransportError> for OAuthError {
    fn from(e: TransportError) -> Self {
        if e.is_cancelled() {
            return Self::new(ErrorKind::Cancelled, Some(Box::new(e)));
        }
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Protocol, Some(Box::new(e)))
            .with_context(msg)
            .with_help("check network connectivity to the authorization server and PDS")
    }
}

impl From<StoreError> for OAuthError {
    fn from(e: StoreError) -> Self {
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Storage, Some(Box::new(e))).with_context(msg)
    }
}

impl From<KeyError> for OAuthError {
    fn from(e: KeyError) -> Self {
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Key, Some(Box::new(e))).with_context(msg)
    }
}

impl From<crate::dpop::Error> for OAuthError {
    fn from(e: crate::dpop::Error) -> Self {
        use crate::dpop::Error as DpopError;
        match e {
            DpopError::Transport(t) => Self::from(t),
            e if e.is_nonce() => {
                let msg = smol_str::format_smolstr!("{e}");
                Self::new(ErrorKind::Nonce, Some(Box::new(e))).with_context(msg)
            }
            e => {
                let msg = smol_str::format_smolstr!("{e}");
                Self::new(ErrorKind::Protocol, Some(Box::new(e)))
                    .with_context(msg)
                    .with_help("check DPoP key configuration and request URLs")
            }
        }
    }
}

impl From<http::Error> for OAuthError {
    fn from(e: http::Error) -> Self {
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Protocol, Some(Box::new(e)))
            .with_context(msg)
            .with_help("verify request URIs and headers are valid")
    }
}

impl From<url::ParseError> for OAuthError {
    fn from(e: url::ParseError) -> Self {
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Protocol, Some(Box::new(e))).with_context(msg)
    }
}

impl From<serde_html_form::ser::Error> for OAuthError {
    fn from(e: serde_html_form::ser::Error) -> Self {
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Protocol, Some(Box::new(e)))
            .with_context(msg)
            .with_help("check OAuth request parameters are serializable")
    }
}

impl From<serde_json::Error> for OAuthError {
    fn from(e: serde_json::Error) -> Self {
        let msg = smol_str::format_smolstr!("{e}");
        Self::new(ErrorKind::Protocol, Some(Box::new(e)))
            .with_context(msg)
            .with_help("verify the response body is valid JSON of the expected shape")
    }
}

pub type Result<T> = core::result::Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use protoflare_common::Did;

    #[test]
    fn classification() {
        assert!(OAuthError::credential("no refresh token available").requires_reauthentication());
        assert!(OAuthError::state("unable to find state").requires_reauthentication());
        assert!(!OAuthError::protocol("HTTP 500").requires_reauthentication());
        assert!(OAuthError::protocol("HTTP 500").is_transient());
        assert!(!OAuthError::nonce("missing").is_transient());

        let cancelled = OAuthError::from(TransportError::Cancelled);
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);

        let missing_pds = OAuthError::from(IdentityError::MissingPdsEndpoint {
            did: Did::new_static("did:plc:abc123"),
        });
        assert_eq!(missing_pds.kind(), ErrorKind::Resolution);
        assert!(missing_pds.is_misconfiguration());
        assert!(!missing_pds.is_transient());

        let network = OAuthError::from(IdentityError::Transport(TransportError::Timeout));
        assert!(network.is_transient());
        assert!(!network.is_misconfiguration());
    }

    #[test]
    fn display_includes_context() {
        let err = OAuthError::state("invalid issuer");
        assert_eq!(err.to_string(), "authorization state error: invalid issuer");
        assert_eq!(ErrorKind::Credential.to_string(), "credential error");
    }
}
