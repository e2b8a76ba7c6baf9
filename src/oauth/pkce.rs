//! CSRF state and PKCE (`S256`) helpers.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

fn random_urlsafe(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random bytes")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Opaque `state` value bound to one authorization request.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_state() -> Result<String> {
    random_urlsafe(24)
}

/// A 43-character code verifier (32 random bytes).
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_verifier() -> Result<String> {
    random_urlsafe(32)
}

#[must_use]
pub fn challenge_s256(verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()))
}
