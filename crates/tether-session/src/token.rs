//! Session bearer tokens: minting and hashed-at-rest verification.
//!
//! The plaintext token leaves the store exactly once, in the approval
//! response. Only the blake3 hash is retained, and verification
//! compares hashes in constant time.

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Length of the random token material in bytes (hex-encoded on the wire).
pub const TOKEN_BYTES: usize = 32;

/// Blake3 hash of a bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Hash a plaintext token.
    #[must_use]
    pub fn of(token: &str) -> Self {
        Self(*blake3::hash(token.as_bytes()).as_bytes())
    }

    /// Constant-time check of a presented plaintext token against this
    /// hash. The comparison cost does not depend on where the first
    /// differing byte is.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        let candidate = blake3::hash(presented.as_bytes());
        self.0.ct_eq(candidate.as_bytes()).into()
    }
}

impl std::fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print hash material.
        f.write_str("TokenHash(..)")
    }
}

/// Mint a fresh unguessable bearer token.
///
/// Returns the plaintext (to hand to the caller once) and the hash (to
/// store).
#[must_use]
pub fn mint_token() -> (String, TokenHash) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let hash = TokenHash::of(&token);
    (token, hash)
}
