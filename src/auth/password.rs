//! Credential helpers: Argon2id hashing, input normalization and one-time codes.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, Rng, RngCore};
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 6;

fn argon2(params: &Params) -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
}

/// Hash a password into a PHC string with a fresh random salt.
///
/// # Errors
/// Returns an error if the RNG fails or hashing is rejected by the parameters.
pub fn hash_password(password: &str, params: &Params) -> Result<String> {
    let mut salt = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate password salt")?;
    let salt = SaltString::encode_b64(&salt).map_err(|err| anyhow!("invalid salt: {err}"))?;
    let hash = argon2(params)
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string.
///
/// Parameters are read from the PHC string, so hashes made with older settings
/// keep verifying. A malformed stored hash never matches.
#[must_use]
pub fn verify_password(password: &str, phc: &str) -> bool {
    #[cfg(test)]
    VERIFICATIONS.with(|count| count.set(count.get() + 1));
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Six-digit verification code, zero padded.
#[must_use]
pub fn generate_otp() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

/// Create a password reset token for email links.
///
/// The raw token is only sent to the user; the account stores its hash.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[cfg(test)]
thread_local! {
    static VERIFICATIONS: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
}

/// Password verifications run on the current thread so far.
#[cfg(test)]
pub(crate) fn verification_count() -> u32 {
    VERIFICATIONS.with(std::cell::Cell::get)
}

#[cfg(test)]
pub(crate) fn test_params() -> Params {
    Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default()
}
