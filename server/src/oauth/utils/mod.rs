use rand::{rngs::OsRng, RngCore};

use crate::errors::AuthError;

/// Number of random bytes behind every nonce and `state` value
pub const NONCE_BYTES: usize = 32;

/// Helper function to create URL-safe base64 encoding without padding
pub fn base64_url_encode(input: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(input)
}

/// Fill `len` bytes from the operating system's secure random source.
///
/// The only failure mode is an unusable entropy source, which is treated as a
/// configuration problem rather than something a retry could fix.
pub fn secure_random_bytes(len: usize) -> Result<Vec<u8>, AuthError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Configuration(format!("secure random source unavailable: {e}")))?;
    Ok(bytes)
}

/// Generate a nonce to be used during the initialization of the sign-in widget
pub fn generate_nonce() -> Result<String, AuthError> {
    Ok(base64_url_encode(&secure_random_bytes(NONCE_BYTES)?))
}

/// Generate the opaque `state` value that ties a callback to the login page render
pub fn generate_state() -> Result<String, AuthError> {
    generate_nonce()
}

/// Compare two strings without short-circuiting on the first differing byte
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
