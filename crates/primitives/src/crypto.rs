//! Signing identities
//!
//! Keys are a closed set of variants rather than trait objects: every node
//! and account picks either ed25519 or secp256k1, and the variant tag travels
//! with the key bytes on the wire.

use crate::error::CryptoError;
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Shared secp256k1 context; building one is expensive
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length of a node / account address
pub const ADDRESS_LENGTH: usize = 20;

/// First 20 bytes of SHA-256 over the public key bytes
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
        let arr: [u8; ADDRESS_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            CryptoError::InvalidAddress(format!(
                "address must be {} bytes, got {}",
                ADDRESS_LENGTH,
                b.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Supported signature schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Ed25519,
    Secp256k1,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Ed25519 => f.write_str("ed25519"),
            KeyKind::Secp256k1 => f.write_str("secp256k1"),
        }
    }
}

impl FromStr for KeyKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" => Ok(KeyKind::Ed25519),
            "secp256k1" => Ok(KeyKind::Secp256k1),
            other => Err(CryptoError::UnknownKeyKind(other.to_string())),
        }
    }
}

/// Public key, tagged with its scheme
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum PubKey {
    /// 32-byte ed25519 verifying key
    Ed25519([u8; 32]),
    /// 33-byte compressed secp256k1 point
    Secp256k1([u8; 33]),
}

impl PubKey {
    /// Parse key bytes for the given scheme, rejecting points that are not on the curve
    pub fn from_bytes(kind: KeyKind, bytes: &[u8]) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    CryptoError::InvalidPublicKey(format!(
                        "ed25519 key must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                VerifyingKey::from_bytes(&arr)
                    .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
                Ok(PubKey::Ed25519(arr))
            }
            KeyKind::Secp256k1 => {
                let key = PublicKey::from_slice(bytes)
                    .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
                Ok(PubKey::Secp256k1(key.serialize()))
            }
        }
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            PubKey::Ed25519(_) => KeyKind::Ed25519,
            PubKey::Secp256k1(_) => KeyKind::Secp256k1,
        }
    }

    /// Raw key bytes, without the scheme tag
    pub fn bytes(&self) -> &[u8] {
        match self {
            PubKey::Ed25519(bytes) => bytes,
            PubKey::Secp256k1(bytes) => bytes,
        }
    }

    pub fn address(&self) -> Address {
        let digest = Sha256::digest(self.bytes());
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&digest[..ADDRESS_LENGTH]);
        Address(out)
    }

    /// Check `signature` over `message`
    ///
    /// Malformed keys or signatures verify as `false`.
    pub fn verify_bytes(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            PubKey::Ed25519(bytes) => {
                let Ok(key) = VerifyingKey::from_bytes(bytes) else {
                    return false;
                };
                let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify_strict(message, &signature).is_ok()
            }
            PubKey::Secp256k1(bytes) => {
                let Ok(key) = PublicKey::from_slice(bytes) else {
                    return false;
                };
                let Ok(signature) = ecdsa::Signature::from_compact(signature) else {
                    return false;
                };
                let digest = Sha256::digest(message);
                let Ok(message) = Message::from_digest_slice(&digest) else {
                    return false;
                };
                SECP256K1_CONTEXT
                    .verify_ecdsa(&message, &signature, &key)
                    .is_ok()
            }
        }
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({}:{})", self.kind(), hex::encode(self.bytes()))
    }
}

/// Private key, tagged with its scheme
#[derive(Clone)]
pub enum PrivKey {
    Ed25519(SigningKey),
    Secp256k1(SecretKey),
}

impl PrivKey {
    /// Fresh key from the OS random number generator
    pub fn generate(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Ed25519 => PrivKey::Ed25519(SigningKey::generate(&mut OsRng)),
            KeyKind::Secp256k1 => PrivKey::Secp256k1(SecretKey::new(&mut OsRng)),
        }
    }

    /// Load a 32-byte secret for the given scheme
    pub fn from_bytes(kind: KeyKind, bytes: &[u8]) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    CryptoError::InvalidSecretKey(format!(
                        "ed25519 secret must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                Ok(PrivKey::Ed25519(SigningKey::from_bytes(&arr)))
            }
            KeyKind::Secp256k1 => SecretKey::from_slice(bytes)
                .map(PrivKey::Secp256k1)
                .map_err(|e| CryptoError::InvalidSecretKey(e.to_string())),
        }
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            PrivKey::Ed25519(_) => KeyKind::Ed25519,
            PrivKey::Secp256k1(_) => KeyKind::Secp256k1,
        }
    }

    /// Secret bytes, for writing a key file
    pub fn secret_bytes(&self) -> [u8; 32] {
        match self {
            PrivKey::Ed25519(key) => key.to_bytes(),
            PrivKey::Secp256k1(key) => key.secret_bytes(),
        }
    }

    pub fn pub_key(&self) -> PubKey {
        match self {
            PrivKey::Ed25519(key) => PubKey::Ed25519(key.verifying_key().to_bytes()),
            PrivKey::Secp256k1(key) => {
                PubKey::Secp256k1(PublicKey::from_secret_key(&SECP256K1_CONTEXT, key).serialize())
            }
        }
    }

    /// Sign `message`; secp256k1 signs the SHA-256 digest and returns a compact signature
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            PrivKey::Ed25519(key) => Ok(key.sign(message).to_bytes().to_vec()),
            PrivKey::Secp256k1(key) => {
                let digest = Sha256::digest(message);
                let message = Message::from_digest_slice(&digest)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, key);
                Ok(signature.serialize_compact().to_vec())
            }
        }
    }
}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivKey({}:<redacted>)", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_both_schemes() {
        for kind in [KeyKind::Ed25519, KeyKind::Secp256k1] {
            let key = PrivKey::generate(kind);
            let pub_key = key.pub_key();
            assert_eq!(pub_key.kind(), kind);

            let sig = key.sign(b"child block").unwrap();
            assert!(pub_key.verify_bytes(b"child block", &sig));
            assert!(!pub_key.verify_bytes(b"other block", &sig));

            let mut tampered = sig.clone();
            tampered[10] ^= 1;
            assert!(!pub_key.verify_bytes(b"child block", &tampered));
            assert!(!pub_key.verify_bytes(b"child block", &sig[1..]));
        }
    }

    #[test]
    fn test_wrong_key_rejects() {
        let a = PrivKey::generate(KeyKind::Secp256k1);
        let b = PrivKey::generate(KeyKind::Secp256k1);
        let sig = a.sign(b"msg").unwrap();
        assert!(!b.pub_key().verify_bytes(b"msg", &sig));
    }

    #[test]
    fn test_secret_round_trip_keeps_address() {
        for kind in [KeyKind::Ed25519, KeyKind::Secp256k1] {
            let key = PrivKey::generate(kind);
            let restored = PrivKey::from_bytes(kind, &key.secret_bytes()).unwrap();
            assert_eq!(key.pub_key(), restored.pub_key());
            assert_eq!(key.pub_key().address(), restored.pub_key().address());
        }
    }

    #[test]
    fn test_pub_key_from_bytes_validates_length() {
        assert!(PubKey::from_bytes(KeyKind::Ed25519, &[1u8; 31]).is_err());
        assert!(PubKey::from_bytes(KeyKind::Secp256k1, &[0u8; 33]).is_err());

        let key = PrivKey::generate(KeyKind::Secp256k1).pub_key();
        let parsed = PubKey::from_bytes(KeyKind::Secp256k1, key.bytes()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_address_hex() {
        let address = PrivKey::generate(KeyKind::Ed25519).pub_key().address();
        let parsed: Address = address.to_hex().parse().unwrap();
        assert_eq!(parsed, address);
        assert!(Address::from_hex("abcd").is_err());
    }

    #[test]
    fn test_key_kind_parse() {
        assert_eq!("ED25519".parse::<KeyKind>().unwrap(), KeyKind::Ed25519);
        assert_eq!("secp256k1".parse::<KeyKind>().unwrap(), KeyKind::Secp256k1);
        assert!("rsa".parse::<KeyKind>().is_err());
    }
}
