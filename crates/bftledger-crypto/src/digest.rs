//! SHA-256 digests.
//!
//! Envelopes are signed over `sha256(payload ‖ timestamp)`; [`sha256`]
//! takes the parts separately so callers never build the concatenation.

use sha2::Sha256;

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Hashes the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> Digest {
    use sha2::Digest as _;

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Digest(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_hash_like_concatenation() {
        let split = sha256(&[b"hello ", b"world"]);
        let whole = sha256(&[b"hello world"]);
        assert_eq!(split, whole);
    }

    #[test]
    fn known_vector() {
        // sha256("abc")
        let digest = sha256(&[b"abc"]);
        assert_eq!(
            &digest.as_bytes()[..4],
            &[0xba, 0x78, 0x16, 0xbf],
        );
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(sha256(&[b"payload", b"t1"]), sha256(&[b"payload", b"t2"]));
    }
}
