//! PKCE primitives: code verifier, S256 challenge, and state parameter.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::auth::error::Error;

/// Generate a code verifier from 32 random bytes, base64url encoded
/// (43 characters, within the 43-128 range of RFC 7636).
pub fn generate_code_verifier() -> Result<String, Error> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::configuration(format!("failed to gather entropy: {err}")))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&hash)
}

/// Generate a random `state` parameter (16 bytes, base64url).
pub fn generate_state() -> Result<String, Error> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::configuration(format!("failed to gather entropy: {err}")))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
