use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{CryptoRng, RngCore, rngs::ThreadRng};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

pub fn get_random_values<R, const LEN: usize>(rng: &mut R) -> [u8; LEN]
where
    R: RngCore + CryptoRng,
{
    let mut bytes = [0u8; LEN];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Opaque authorization `state`: 32 random bytes, base64url
pub fn generate_state() -> SmolStr {
    SmolStr::new(URL_SAFE_NO_PAD.encode(get_random_values::<_, 32>(&mut ThreadRng::default())))
}

/// PKCE code verifier: 32 random bytes, base64url (43 characters)
pub fn generate_verifier() -> SmolStr {
    SmolStr::new(URL_SAFE_NO_PAD.encode(get_random_values::<_, 32>(&mut ThreadRng::default())))
}

/// Random DPoP proof identifier
pub fn generate_jti() -> SmolStr {
    SmolStr::new(URL_SAFE_NO_PAD.encode(get_random_values::<_, 16>(&mut ThreadRng::default())))
}

/// S256 code challenge for `verifier`
pub fn pkce_challenge(verifier: &str) -> SmolStr {
    // https://datatracker.ietf.org/doc/html/rfc7636#section-4.2
    SmolStr::new(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())))
}

/// Check a verifier against a previously issued challenge
pub fn verify_pkce(verifier: &str, challenge: &str) -> bool {
    pkce_challenge(verifier) == challenge
}

/// `ath` claim: base64url SHA-256 of an access token
pub fn access_token_hash(token: &str) -> SmolStr {
    SmolStr::new(URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_rfc7636_vector() {
        // appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(pkce_challenge(verifier), pkce_challenge(verifier));
        assert!(verify_pkce(verifier, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"));
    }

    #[test]
    fn pkce_mismatch() {
        let a = generate_verifier();
        let b = generate_verifier();
        assert_ne!(a, b);
        assert!(!verify_pkce(&b, &pkce_challenge(&a)));
    }

    #[test]
    fn random_values_are_base64url() {
        let state = generate_state();
        assert_eq!(state.len(), 43);
        assert!(
            state
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_eq!(generate_verifier().len(), 43);
        assert_ne!(generate_jti(), generate_jti());
    }
}
