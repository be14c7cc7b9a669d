//! Signed transactions
//!
//! On the wire a transaction is just bytes; this is the structure those
//! bytes decode to. The signed message is the borsh layout of
//! `(nonce, payload)`.

use crate::codec;
use crate::crypto::{Address, PrivKey, PubKey};
use crate::error::{CodecError, CryptoError};
use crate::hash::Hash;
use crate::merkle;
use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    /// Sender-chosen sequence number
    pub nonce: u64,
    /// Opaque application payload
    pub payload: Vec<u8>,
    /// Sender's public key
    pub pub_key: PubKey,
    /// Signature over [`SignedTransaction::message`]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Build and sign a transaction
    pub fn sign(priv_key: &PrivKey, nonce: u64, payload: Vec<u8>) -> Result<Self, CryptoError> {
        let signature = priv_key.sign(&Self::signing_bytes(nonce, &payload)?)?;
        Ok(Self {
            nonce,
            payload,
            pub_key: priv_key.pub_key(),
            signature,
        })
    }

    /// Bytes covered by the signature
    pub fn signing_bytes(nonce: u64, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        codec::encode(&(nonce, payload))
    }

    pub fn message(&self) -> Result<Vec<u8>, CodecError> {
        Self::signing_bytes(self.nonce, &self.payload)
    }

    /// False for a bad signature or a payload too long to encode
    pub fn verify_signature(&self) -> bool {
        self.message()
            .is_ok_and(|message| self.pub_key.verify_bytes(&message, &self.signature))
    }

    pub fn sender(&self) -> Address {
        self.pub_key.address()
    }

    /// Canonical wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }

    /// Content hash, identical to the transaction's Merkle leaf hash
    pub fn hash(&self) -> Result<Hash, CodecError> {
        Ok(merkle::leaf_hash(&self.to_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyKind;

    #[test]
    fn test_signed_transaction_verifies() {
        let key = PrivKey::generate(KeyKind::Ed25519);
        let tx = SignedTransaction::sign(&key, 7, b"pay bob 5".to_vec()).unwrap();
        assert!(tx.verify_signature());
        assert_eq!(tx.sender(), key.pub_key().address());

        let decoded = SignedTransaction::from_bytes(&tx.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_signing_bytes_match_borsh_layout() {
        let expected = borsh::to_vec(&(9u64, b"abc".to_vec())).unwrap();
        assert_eq!(SignedTransaction::signing_bytes(9, b"abc").unwrap(), expected);

        let key = PrivKey::generate(KeyKind::Ed25519);
        let tx = SignedTransaction::sign(&key, 9, b"abc".to_vec()).unwrap();
        assert_eq!(tx.message().unwrap(), expected);
    }

    #[test]
    fn test_changed_payload_breaks_signature() {
        let key = PrivKey::generate(KeyKind::Secp256k1);
        let mut tx = SignedTransaction::sign(&key, 1, b"pay bob 5".to_vec()).unwrap();
        tx.payload = b"pay bob 500".to_vec();
        assert!(!tx.verify_signature());
    }
}
