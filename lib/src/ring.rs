//! The circular identifier space shared by every node.
//!
//! Nodes and keys are placed on a ring of `MODULUS` positions. Every node
//! must compute the same position for the same address, so the hash is a
//! fixed digest of the address string rather than anything process-local.

use sha1::{Digest, Sha1};

/// A point on the ring, always in `[0, MODULUS)`.
pub type Position = u64;

/// Size of the identifier space (2^31 - 1).
pub const MODULUS: u64 = 2_147_483_647;

/// Odd multiplier applied to the raw hash before reduction.
pub const MULTIPLIER: i64 = 1_073_741_651;

/// The first four bytes of the SHA-1 digest of `address`, big-endian.
pub fn raw_hash(address: &str) -> i32 {
    let digest = Sha1::digest(address.as_bytes());
    let mut prefix = [0u8; 4];
    prefix
        .iter_mut()
        .zip(digest.iter())
        .for_each(|(dst, src)| *dst = *src);
    i32::from_be_bytes(prefix)
}

/// Maps a node address onto the ring.
///
/// Two distinct addresses can collide; nothing downstream tie-breaks them.
pub fn position_of(address: &str) -> Position {
    let scrambled = i64::from(raw_hash(address)) * MULTIPLIER;
    (scrambled % MODULUS as i64).unsigned_abs()
}

/// Maps an arbitrary key string onto the ring.
pub fn key_of(value: &str) -> Position {
    position_of(value)
}

// `key` is between `lower` and `upper` if it lies in the clockwise interval
// (lower, upper]. When lower == upper the walk covers the whole ring.
pub fn is_between(key: Position, lower: Position, upper: Position) -> bool {
    if lower < upper {
        lower < key && key <= upper
    } else if lower > upper {
        lower < key || key <= upper
    } else {
        true
    }
}
