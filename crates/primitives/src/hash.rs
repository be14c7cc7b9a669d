//! Digest helpers

/// 32-byte BLAKE3 digest
pub type Hash = [u8; 32];

/// All-zero hash, used for the genesis parent and unset block ids
pub const ZERO_HASH: Hash = [0u8; 32];

/// Hash arbitrary bytes
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// First 8 bytes of a hash in hex, for log lines
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}
