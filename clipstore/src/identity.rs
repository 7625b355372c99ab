//! Caller identity and the fixed shard hash

use serde::{Deserialize, Serialize};
use std::fmt;

/// Multiplier of the 32-bit golden-ratio hash
const GOLDEN_RATIO_32: u32 = 0x61C8_8647;

/// Opaque identity of a caller (an account id)
///
/// The platform resolves it once per session; the store only compares
/// and hashes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    uid: u32,
}

impl Identity {
    /// The administrative caller
    pub const ADMIN: Identity = Identity { uid: 0 };

    #[must_use]
    pub const fn new(uid: u32) -> Self {
        Self { uid }
    }

    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.uid == Self::ADMIN.uid
    }

    /// Bucket of this identity in a table of `1 << bits` buckets
    #[must_use]
    pub fn bucket(&self, bits: u32) -> usize {
        hash_min(self.uid, bits)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{}", self.uid)
    }
}

impl From<u32> for Identity {
    fn from(uid: u32) -> Self {
        Self::new(uid)
    }
}

/// Multiplicative hash keeping the top `bits` bits
#[must_use]
pub fn hash_min(val: u32, bits: u32) -> usize {
    if bits == 0 {
        return 0;
    }
    let hashed = val.wrapping_mul(GOLDEN_RATIO_32) >> (32 - bits.min(32));
    hashed as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_in_range() {
        for uid in [0u32, 1, 1000, 65534, u32::MAX] {
            let a = hash_min(uid, 10);
            let b = hash_min(uid, 10);
            assert_eq!(a, b);
            assert!(a < 1024);
        }
    }

    #[test]
    fn test_zero_bits_single_bucket() {
        assert_eq!(Identity::new(1234).bucket(0), 0);
        assert_eq!(Identity::new(u32::MAX).bucket(0), 0);
    }

    #[test]
    fn test_consecutive_uids_spread() {
        let buckets: std::collections::HashSet<usize> =
            (1000..1016).map(|uid| Identity::new(uid).bucket(10)).collect();
        assert!(buckets.len() > 8, "golden-ratio hash should spread nearby uids");
    }

    #[test]
    fn test_admin() {
        assert!(Identity::ADMIN.is_admin());
        assert!(!Identity::new(1000).is_admin());
        assert_eq!(Identity::new(1000).to_string(), "uid:1000");
    }
}
