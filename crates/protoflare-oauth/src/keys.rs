use std::fmt;

use elliptic_curve::SecretKey;
use jose_jwk::{Jwk, Key, crypto};
use miette::Diagnostic;
use p256::NistP256;
use p256::ecdsa::SigningKey;
use rand::rngs::ThreadRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors importing a DPoP key
#[derive(Debug, Error, Diagnostic)]
pub enum KeyError {
    /// The JWK could not be converted to key material
    #[error("invalid JWK: {0}")]
    #[diagnostic(
        code(protoflare_oauth::key::invalid_jwk),
        help("ensure EC P-256 JWK with base64url x,y,d values")
    )]
    InvalidJwk(String),

    /// The JWK is valid but not a P-256 key of the expected kind
    #[error("expected a P-256 {expected} key")]
    #[diagnostic(code(protoflare_oauth::key::unsupported))]
    Unsupported {
        /// `public` or `private`
        expected: &'static str,
    },

    /// The stored public key is not the private key's public half
    #[error("public key does not match private key")]
    #[diagnostic(
        code(protoflare_oauth::key::mismatch),
        help("the stored credential record is corrupt; log in again")
    )]
    Mismatch,
}

/// An ES256 keypair that DPoP proofs are signed with.
///
/// One key is generated per login and stays with the session until logout.
#[derive(Clone)]
pub struct DpopKey {
    secret: SecretKey<NistP256>,
}

impl DpopKey {
    /// Fresh random P-256 key
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::<NistP256>::random(&mut ThreadRng::default()),
        }
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from(self.secret.clone())
    }

    /// Public half as a JWK, as embedded in proof headers
    pub fn public_jwk(&self) -> Jwk {
        Jwk {
            key: Key::from(&crypto::Key::from(self.secret.public_key())),
            prm: Default::default(),
        }
    }

    /// Private key as a JWK (includes `d`)
    pub fn private_jwk(&self) -> Jwk {
        Jwk {
            key: Key::from(&crypto::Key::from(self.secret.clone())),
            prm: Default::default(),
        }
    }

    /// Encode for storage
    pub fn to_portable(&self) -> PortableKeyPair {
        PortableKeyPair {
            public_key: self.public_jwk(),
            private_key: self.private_jwk(),
        }
    }

    /// Decode a stored keypair, checking that both halves belong together
    pub fn from_portable(pair: &PortableKeyPair) -> Result<Self, KeyError> {
        let secret = match crypto::Key::try_from(&pair.private_key.key)
            .map_err(|e| KeyError::InvalidJwk(format!("{e:?}")))?
        {
            crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
            _ => return Err(KeyError::Unsupported { expected: "private" }),
        };
        let public = match crypto::Key::try_from(&pair.public_key.key)
            .map_err(|e| KeyError::InvalidJwk(format!("{e:?}")))?
        {
            crypto::Key::P256(crypto::Kind::Public(pk)) => pk,
            crypto::Key::P256(crypto::Kind::Secret(sk)) => sk.public_key(),
            _ => return Err(KeyError::Unsupported { expected: "public" }),
        };
        if public != secret.public_key() {
            return Err(KeyError::Mismatch);
        }
        Ok(Self { secret })
    }
}

impl fmt::Debug for DpopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DpopKey").finish_non_exhaustive()
    }
}

/// A DPoP keypair as stored alongside credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableKeyPair {
    /// Public JWK (`kty`, `crv`, `x`, `y`)
    pub public_key: Jwk,
    /// Private JWK (adds `d`)
    pub private_key: Jwk,
}
