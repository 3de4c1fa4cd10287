use std::future::Future;

use bon::Builder;
use chrono::Utc;
use http::header::{AUTHORIZATION, InvalidHeaderValue, WWW_AUTHENTICATE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use jose_jwa::{Algorithm, Signing};
use miette::Diagnostic;
use protoflare_common::error::TransportError;
use protoflare_common::http_client::HttpClient;
use smol_str::SmolStr;
use url::Url;

use crate::jose::{self, Claims, Header, JoseError, PublicClaims, RegisteredClaims};
use crate::keys::DpopKey;
use crate::utils::{access_token_hash, generate_jti};

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";
pub const DPOP_HEADER: &str = "DPoP";
pub const DPOP_NONCE_HEADER: &str = "DPoP-Nonce";

#[derive(serde::Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(code(protoflare_oauth::dpop::header))]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("failed to build request: {0}")]
    #[diagnostic(code(protoflare_oauth::dpop::request))]
    Request(#[from] http::Error),
    #[error("invalid request URL: {0}")]
    #[diagnostic(code(protoflare_oauth::dpop::url))]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    #[diagnostic(code(protoflare_oauth::dpop::serde))]
    SerdeJson(#[from] serde_json::Error),
    #[error("server asked for a DPoP nonce without sending one")]
    #[diagnostic(
        code(protoflare_oauth::dpop::missing_nonce),
        help("the server must return a `DPoP-Nonce` header with a `use_dpop_nonce` error")
    )]
    MissingNonce,
    #[error("server rejected the DPoP nonce twice")]
    #[diagnostic(
        code(protoflare_oauth::dpop::repeated_challenge),
        help("requests are retried once with the fresh nonce; the server rejected that one too")
    )]
    RepeatedChallenge {
        /// Latest nonce the server issued
        nonce: SmolStr,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether the failure is about nonce negotiation rather than transport or encoding
    pub fn is_nonce(&self) -> bool {
        matches!(self, Error::MissingNonce | Error::RepeatedChallenge { .. })
    }

    /// Nonce the server handed out before the request failed, if any
    pub fn issued_nonce(&self) -> Option<&SmolStr> {
        match self {
            Error::RepeatedChallenge { nonce } => Some(nonce),
            _ => None,
        }
    }
}

type Result<T> = core::result::Result<T, Error>;

/// Reasons a received proof is rejected
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum ProofError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Jose(#[from] JoseError),
    #[error("proof `typ` is not `dpop+jwt`")]
    #[diagnostic(code(protoflare_oauth::dpop::proof_typ))]
    Typ,
    #[error("proof `{claim}` claim does not match the request")]
    #[diagnostic(code(protoflare_oauth::dpop::proof_claim))]
    Claim { claim: &'static str },
}

/// `htu` value: the request URL without query or fragment
pub fn htu(url: &str) -> core::result::Result<SmolStr, url::ParseError> {
    let mut url = Url::parse(url)?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(SmolStr::new(url.as_str()))
}

/// Build a compact JWS (ES256) for DPoP with embedded public JWK.
pub fn build_dpop_proof(
    key: &DpopKey,
    method: &Method,
    url: &str,
    nonce: Option<&str>,
    access_token: Option<&str>,
) -> Result<String> {
    let mut header = Header::from(Algorithm::Signing(Signing::Es256));
    header.typ = Some(SmolStr::new_static(JWT_HEADER_TYP_DPOP));
    header.jwk = Some(key.public_jwk());

    let claims = Claims {
        registered: RegisteredClaims {
            jti: Some(generate_jti()),
            iat: Some(Utc::now().timestamp()),
            ..Default::default()
        },
        public: PublicClaims {
            htm: Some(SmolStr::new(method.as_str())),
            htu: Some(htu(url)?),
            // https://datatracker.ietf.org/doc/html/rfc9449#section-4.2
            ath: access_token.map(access_token_hash),
            nonce: nonce.map(SmolStr::new),
        },
    };
    Ok(jose::create_signed_jwt(&key.signing_key(), &header, &claims)?)
}

/// Check a proof's signature and its binding to `method`, `url` and `nonce`.
pub fn verify_dpop_proof(
    proof: &str,
    method: &Method,
    url: &str,
    nonce: Option<&str>,
) -> core::result::Result<Claims, ProofError> {
    let (header, claims) = jose::verify_signed_jwt(proof)?;
    if header.typ.as_deref() != Some(JWT_HEADER_TYP_DPOP) {
        return Err(ProofError::Typ);
    }
    if claims.public.htm.as_deref() != Some(method.as_str()) {
        return Err(ProofError::Claim { claim: "htm" });
    }
    let expected_htu = htu(url).map_err(|_| ProofError::Claim { claim: "htu" })?;
    if claims.public.htu.as_deref() != Some(expected_htu.as_str()) {
        return Err(ProofError::Claim { claim: "htu" });
    }
    if claims.public.nonce.as_deref() != nonce {
        return Err(ProofError::Claim { claim: "nonce" });
    }
    Ok(claims)
}

/// Inputs for one DPoP-protected call
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct DpopOptions<'a> {
    #[builder(start_fn)]
    pub key: &'a DpopKey,
    /// Sent as `Authorization: DPoP <token>` and bound through `ath`
    pub access_token: Option<&'a str>,
    /// Last nonce the server handed out
    pub nonce: Option<&'a str>,
    /// Retry once when the server answers with a nonce challenge
    #[builder(default = true)]
    pub retry_on_nonce_challenge: bool,
}

/// Whether `response` asks the client to retry with a fresh nonce.
///
/// Authorization servers answer 400/401 with a JSON `use_dpop_nonce` error;
/// resource servers may instead answer 401 with a `WWW-Authenticate: DPoP`
/// challenge.
pub fn is_nonce_challenge(response: &Response<Vec<u8>>) -> bool {
    let status = response.status();
    if status != StatusCode::BAD_REQUEST && status != StatusCode::UNAUTHORIZED {
        return false;
    }
    if let Ok(res) = serde_json::from_slice::<ErrorResponse>(response.body()) {
        if res.error == "use_dpop_nonce" {
            return true;
        }
    }
    // https://datatracker.ietf.org/doc/html/rfc9449#name-resource-server-provided-no
    status == StatusCode::UNAUTHORIZED
        && response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("DPoP") && v.contains(r#"error="use_dpop_nonce""#))
}

/// The `DPoP-Nonce` response header, if present
pub fn response_nonce(response: &Response<Vec<u8>>) -> Option<SmolStr> {
    response
        .headers()
        .get(DPOP_NONCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(SmolStr::new)
}

async fn send_signed<C, F>(
    client: &C,
    build: &mut F,
    opts: &DpopOptions<'_>,
    nonce: Option<&str>,
) -> Result<Response<Vec<u8>>>
where
    C: HttpClient,
    F: FnMut() -> core::result::Result<Request<Vec<u8>>, http::Error>,
{
    let mut request = build()?;
    let uri = request.uri().to_string();
    let proof = build_dpop_proof(
        opts.key,
        request.method(),
        &uri,
        nonce,
        opts.access_token,
    )?;
    if let Some(token) = opts.access_token {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&format!("DPoP {token}"))?);
    }
    request
        .headers_mut()
        .insert(DPOP_HEADER, HeaderValue::from_str(&proof)?);
    client
        .send_http(request)
        .await
        .map_err(|e| Error::Transport(TransportError::from_client_error(e)))
}

/// Send a DPoP-protected request, answering at most one nonce challenge.
///
/// `build` is called once per attempt, since request bodies are consumed by
/// sending. Returns the nonce to use next (the response's `DPoP-Nonce`, or
/// the nonce the final attempt was signed with) and the final response.
pub async fn dpop_send<C, F>(
    client: &C,
    mut build: F,
    opts: DpopOptions<'_>,
) -> Result<(Option<SmolStr>, Response<Vec<u8>>)>
where
    C: HttpClient,
    F: FnMut() -> core::result::Result<Request<Vec<u8>>, http::Error>,
{
    let response = send_signed(client, &mut build, &opts, opts.nonce).await?;
    if !opts.retry_on_nonce_challenge || !is_nonce_challenge(&response) {
        let nonce = response_nonce(&response).or_else(|| opts.nonce.map(SmolStr::new));
        return Ok((nonce, response));
    }

    let fresh = response_nonce(&response).ok_or(Error::MissingNonce)?;
    drop(response);
    #[cfg(feature = "tracing")]
    tracing::debug!(nonce = %fresh, "retrying with server-provided DPoP nonce");

    let response = send_signed(client, &mut build, &opts, Some(&fresh)).await?;
    if is_nonce_challenge(&response) {
        let nonce = response_nonce(&response).unwrap_or(fresh);
        return Err(Error::RepeatedChallenge { nonce });
    }
    let nonce = response_nonce(&response).unwrap_or(fresh);
    Ok((Some(nonce), response))
}

/// DPoP sending on top of any [`HttpClient`]
pub trait DpopExt: HttpClient {
    fn dpop_send<F>(
        &self,
        build: F,
        opts: DpopOptions<'_>,
    ) -> impl Future<Output = Result<(Option<SmolStr>, Response<Vec<u8>>)>> + Send
    where
        Self: Sync + Sized,
        F: FnMut() -> core::result::Result<Request<Vec<u8>>, http::Error> + Send,
    {
        dpop_send(self, build, opts)
    }
}

impl<T: HttpClient> DpopExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_binds_method_url_and_nonce() {
        let key = DpopKey::generate();
        let url = "https://auth.example.com/oauth/token?x=1#frag";
        let proof = build_dpop_proof(&key, &Method::POST, url, Some("n1"), None).unwrap();

        let claims = verify_dpop_proof(&proof, &Method::POST, url, Some("n1")).unwrap();
        assert_eq!(
            claims.public.htu.as_deref(),
            Some("https://auth.example.com/oauth/token")
        );
        assert!(claims.registered.jti.is_some());
        assert!(claims.registered.iat.is_some());
        assert!(claims.public.ath.is_none());

        assert!(matches!(
            verify_dpop_proof(&proof, &Method::GET, url, Some("n1")),
            Err(ProofError::Claim { claim: "htm" })
        ));
        assert!(matches!(
            verify_dpop_proof(&proof, &Method::POST, "https://auth.example.com/oauth/par", Some("n1")),
            Err(ProofError::Claim { claim: "htu" })
        ));
        assert!(matches!(
            verify_dpop_proof(&proof, &Method::POST, url, Some("n2")),
            Err(ProofError::Claim { claim: "nonce" })
        ));
    }

    #[test]
    fn proof_carries_access_token_hash() {
        let key = DpopKey::generate();
        let proof = build_dpop_proof(
            &key,
            &Method::GET,
            "https://pds.example.com/xrpc/app.bsky.actor.getProfile",
            None,
            Some("token-123"),
        )
        .unwrap();
        let (header, claims) = jose::verify_signed_jwt(&proof).unwrap();
        assert_eq!(header.typ.as_deref(), Some("dpop+jwt"));
        assert_eq!(header.jwk, Some(key.public_jwk()));
        assert_eq!(claims.public.ath, Some(access_token_hash("token-123")));
        assert!(claims.public.nonce.is_none());
    }

    #[test]
    fn challenge_detection() {
        let json = |status: u16, body: &str| {
            Response::builder()
                .status(status)
                .body(body.as_bytes().to_vec())
                .unwrap()
        };
        assert!(is_nonce_challenge(&json(400, r#"{"error":"use_dpop_nonce"}"#)));
        assert!(is_nonce_challenge(&json(401, r#"{"error":"use_dpop_nonce"}"#)));
        assert!(!is_nonce_challenge(&json(400, r#"{"error":"invalid_grant"}"#)));
        assert!(!is_nonce_challenge(&json(500, r#"{"error":"use_dpop_nonce"}"#)));
        assert!(!is_nonce_challenge(&json(400, "not json")));

        let www = Response::builder()
            .status(401)
            .header(
                WWW_AUTHENTICATE,
                r#"DPoP error="use_dpop_nonce", error_description="Resource server requires nonce""#,
            )
            .body(Vec::new())
            .unwrap();
        assert!(is_nonce_challenge(&www));
    }
}
