//! Executor token minting and verification for the pairing flow
//! (`POST /internal/v1/managed-executors/issue`) and WebSocket auth.
//!
//! The raw token is shown to the operator exactly once at mint time; only
//! its SHA-256 hex digest is persisted in `executors.token_hash`.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a fresh random bearer token and its storable hash.
pub fn mint_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = format!("exec_{}", hex::encode(bytes));
    let hash = hash_token(&token);
    (token, hash)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time-ish compare against a stored hash (both sides are already
/// hex digests of fixed length, so a straight comparison leaks no more than
/// the hash itself would).
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    hash_token(token) == stored_hash
}
