//! Compact JWS encoding for the handful of JWTs this crate produces.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, crypto};
use miette::Diagnostic;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<SmolStr>,
}

impl From<Algorithm> for Header {
    fn from(alg: Algorithm) -> Self {
        Self {
            alg,
            typ: None,
            jwk: None,
            kid: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Claims {
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    #[serde(flatten)]
    pub public: PublicClaims,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegisteredClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<SmolStr>,
}

/// DPoP-specific claims (RFC 9449 §4.2)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PublicClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htm: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htu: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<SmolStr>,
}

/// Reasons a compact JWS is rejected
#[derive(Debug, Error, Diagnostic)]
pub enum JoseError {
    #[error("malformed compact JWS")]
    #[diagnostic(code(protoflare_oauth::jose::malformed))]
    Malformed,
    #[error("invalid JWS segment encoding: {0}")]
    #[diagnostic(code(protoflare_oauth::jose::encoding))]
    Encoding(#[from] base64::DecodeError),
    #[error(transparent)]
    #[diagnostic(code(protoflare_oauth::jose::json))]
    Json(#[from] serde_json::Error),
    #[error("only ES256 with an embedded P-256 JWK is supported")]
    #[diagnostic(code(protoflare_oauth::jose::unsupported))]
    Unsupported,
    #[error("signature verification failed")]
    #[diagnostic(code(protoflare_oauth::jose::signature))]
    BadSignature,
}

pub fn create_signed_jwt(
    key: &SigningKey,
    header: &Header,
    claims: &Claims,
) -> serde_json::Result<String> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_string(header)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(claims)?);
    let signature: Signature = key.sign(format!("{header}.{payload}").as_bytes());
    Ok(format!(
        "{header}.{payload}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

/// Decode a compact JWS and check its ES256 signature against the JWK in its header
pub fn verify_signed_jwt(token: &str) -> Result<(Header, Claims), JoseError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(JoseError::Malformed);
    };
    let header: Header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64)?)?;
    let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload_b64)?)?;
    if header.alg != Algorithm::Signing(Signing::Es256) {
        return Err(JoseError::Unsupported);
    }
    let jwk = header.jwk.as_ref().ok_or(JoseError::Unsupported)?;
    let public = match crypto::Key::try_from(&jwk.key).map_err(|_| JoseError::Unsupported)? {
        crypto::Key::P256(crypto::Kind::Public(pk)) => pk,
        _ => return Err(JoseError::Unsupported),
    };
    let signature =
        Signature::from_slice(&URL_SAFE_NO_PAD.decode(sig_b64)?).map_err(|_| JoseError::BadSignature)?;
    VerifyingKey::from(public)
        .verify(format!("{header_b64}.{payload_b64}").as_bytes(), &signature)
        .map_err(|_| JoseError::BadSignature)?;
    Ok((header, claims))
}
