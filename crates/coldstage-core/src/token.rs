//! Opaque token string generation.

use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::defaults::TOKEN_LENGTH;

/// Generate a 32-character hex token string.
///
/// The digest mixes the job id, requester address, current timestamp, and
/// 16 bytes from the OS CSPRNG; unguessability comes from the random bytes,
/// the rest keeps collisions across jobs structurally impossible.
pub fn generate_token(job_id: i64, user_email: &str) -> String {
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);

    let mut hasher = Sha256::new();
    hasher.update(job_id.to_be_bytes());
    hasher.update(user_email.as_bytes());
    hasher.update(Utc::now().timestamp_micros().to_be_bytes());
    hasher.update(random);

    hex::encode(hasher.finalize())[..TOKEN_LENGTH].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_is_32_hex_chars() {
        let token = generate_token(42, "a@x.edu");
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_token(42, "a@x.edu")).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_tokens_differ_across_jobs() {
        assert_ne!(generate_token(1, "a@x.edu"), generate_token(2, "a@x.edu"));
    }
}
