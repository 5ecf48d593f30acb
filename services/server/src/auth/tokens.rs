//! Access key token generation and hashing.
//!
//! Token format: `dwk_<32 random bytes, base64url without padding>`.
//!
//! Only the SHA-256 hash of a token is stored. The plaintext is handed to
//! the admin once, at creation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix for every access key token.
pub const KEY_TOKEN_PREFIX: &str = "dwk_";

/// Token bytes (32 bytes = 256 bits of entropy).
const TOKEN_BYTES: usize = 32;

/// Characters of the random part kept in the display hint.
const HINT_CHARS: usize = 6;

/// Generate a new access key token.
pub fn generate_key_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    let encoded = URL_SAFE_NO_PAD.encode(bytes);
    format!("{}{}", KEY_TOKEN_PREFIX, encoded)
}

/// Hash a token for storage using SHA-256.
/// The hash is returned as a hex string.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{:x}", digest)
}

/// Short, non-secret rendering of a token for key listings.
pub fn token_hint(token: &str) -> String {
    let body = token.strip_prefix(KEY_TOKEN_PREFIX).unwrap_or(token);
    let head: String = body.chars().take(HINT_CHARS).collect();
    format!("{KEY_TOKEN_PREFIX}{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = generate_key_token();
        assert!(token.starts_with(KEY_TOKEN_PREFIX));
        // 32 bytes base64 without padding = 43 chars
        assert_eq!(token.len(), KEY_TOKEN_PREFIX.len() + 43);
        assert!(URL_SAFE_NO_PAD
            .decode(&token[KEY_TOKEN_PREFIX.len()..])
            .is_ok());
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_key_token(), generate_key_token());
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_token("dwk_abc");
        assert_eq!(hash, hash_token("dwk_abc"));
        assert_ne!(hash, hash_token("dwk_abd"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hint_does_not_leak_token() {
        let token = generate_key_token();
        let hint = token_hint(&token);
        assert!(hint.starts_with(KEY_TOKEN_PREFIX));
        assert!(hint.ends_with("..."));
        assert!(hint.len() < token.len());
        assert!(token.starts_with(hint.trim_end_matches("...")));
    }
}
