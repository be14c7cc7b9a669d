//! Binary Merkle tree over an ordered list of byte blobs
//!
//! A list of `n > 1` items is split at `ceil(n / 2)`, so the left subtree
//! takes the larger half when `n` is odd. Inner nodes hash the
//! length-prefixed concatenation of the two child roots, which keeps two
//! different trees from sharing a preimage. The shape is fixed by the item
//! count alone; any two nodes hashing the same ordered items get the same
//! root.

use crate::error::ProofError;
use crate::hash::{hash, short_hex, Hash, ZERO_HASH};
use borsh::{BorshDeserialize, BorshSerialize};

/// Hash of a single leaf
pub fn leaf_hash(item: &[u8]) -> Hash {
    hash(item)
}

/// Hash of an inner node from its two children
///
/// Each child is written as a 4-byte little-endian length followed by its
/// bytes (the borsh layout of a byte vector).
pub fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    write_length_prefixed(&mut hasher, left);
    write_length_prefixed(&mut hasher, right);
    *hasher.finalize().as_bytes()
}

fn write_length_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

/// Size of the left subtree for `n` items
fn split_point(n: usize) -> usize {
    n.div_ceil(2)
}

/// Merkle root of `items`, or `None` for an empty list
pub fn root<T: AsRef<[u8]>>(items: &[T]) -> Option<Hash> {
    match items.len() {
        0 => None,
        1 => Some(leaf_hash(items[0].as_ref())),
        n => {
            let k = split_point(n);
            let left = root(&items[..k])?;
            let right = root(&items[k..])?;
            Some(inner_hash(&left, &right))
        }
    }
}

/// Merkle root plus one inclusion proof per item
///
/// Returns `None` for an empty list.
pub fn proofs<T: AsRef<[u8]>>(items: &[T]) -> Option<(Hash, Vec<Proof>)> {
    if items.is_empty() {
        return None;
    }

    let leaves: Vec<Hash> = items.iter().map(|item| leaf_hash(item.as_ref())).collect();
    let (root, trails) = build_trails(&leaves);
    let total = leaves.len() as u64;

    let proofs = trails
        .into_iter()
        .zip(leaves)
        .enumerate()
        .map(|(index, (aunts, leaf_hash))| Proof {
            index: index as u64,
            total,
            leaf_hash,
            aunts,
        })
        .collect();

    Some((root, proofs))
}

/// Walk the same split as [`root`], collecting each leaf's aunts leaf-first
fn build_trails(leaves: &[Hash]) -> (Hash, Vec<Vec<Hash>>) {
    match leaves.len() {
        0 => (ZERO_HASH, Vec::new()),
        1 => (leaves[0], vec![Vec::new()]),
        n => {
            let k = split_point(n);
            let (left_root, mut left_trails) = build_trails(&leaves[..k]);
            let (right_root, mut right_trails) = build_trails(&leaves[k..]);

            for trail in &mut left_trails {
                trail.push(right_root);
            }
            for trail in &mut right_trails {
                trail.push(left_root);
            }

            left_trails.append(&mut right_trails);
            (inner_hash(&left_root, &right_root), left_trails)
        }
    }
}

/// Number of aunts a proof for `index` in a tree of `total` leaves carries
fn expected_aunts(mut index: u64, mut total: u64) -> usize {
    let mut depth = 0;
    while total > 1 {
        let k = total.div_ceil(2);
        if index < k {
            total = k;
        } else {
            index -= k;
            total -= k;
        }
        depth += 1;
    }
    depth
}

/// Recompute the root from a leaf and its aunts (last aunt is the root's other child)
fn compute_from_aunts(index: u64, total: u64, leaf: Hash, aunts: &[Hash]) -> Option<Hash> {
    if index >= total {
        return None;
    }
    match total {
        0 => None,
        1 => aunts.is_empty().then_some(leaf),
        _ => {
            let (last, rest) = aunts.split_last()?;
            let k = total.div_ceil(2);
            if index < k {
                let left = compute_from_aunts(index, k, leaf, rest)?;
                Some(inner_hash(&left, last))
            } else {
                let right = compute_from_aunts(index - k, total - k, leaf, rest)?;
                Some(inner_hash(last, &right))
            }
        }
    }
}

/// Inclusion proof for one leaf
///
/// Indices are unsigned, so a negative index cannot be represented at all.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proof {
    /// Position of the leaf (0-based)
    pub index: u64,
    /// Number of leaves in the tree
    pub total: u64,
    /// Hash of the leaf this proof is for
    pub leaf_hash: Hash,
    /// Sibling hashes from the leaf up to the root
    pub aunts: Vec<Hash>,
}

impl Proof {
    /// Check that this proof links `leaf` to `root`
    pub fn verify(&self, root: &Hash, leaf: &Hash) -> Result<(), ProofError> {
        if self.total == 0 {
            return Err(ProofError::EmptyTree);
        }
        if self.index >= self.total {
            return Err(ProofError::IndexOutOfRange {
                index: self.index,
                total: self.total,
            });
        }
        if leaf != &self.leaf_hash {
            return Err(ProofError::LeafHashMismatch);
        }

        let expected = expected_aunts(self.index, self.total);
        if self.aunts.len() != expected {
            return Err(ProofError::AuntCountMismatch {
                expected,
                actual: self.aunts.len(),
            });
        }

        let computed = self.compute_root().ok_or(ProofError::AuntCountMismatch {
            expected,
            actual: self.aunts.len(),
        })?;

        if &computed != root {
            return Err(ProofError::RootMismatch {
                computed: short_hex(&computed),
                claimed: short_hex(root),
            });
        }

        Ok(())
    }

    /// Root implied by this proof, `None` when the trail does not fit the shape
    pub fn compute_root(&self) -> Option<Hash> {
        compute_from_aunts(self.index, self.total, self.leaf_hash, &self.aunts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("tx-{}", i).into_bytes()).collect()
    }

    #[test]
    fn test_empty_root_is_none() {
        let empty: Vec<Vec<u8>> = Vec::new();
        assert!(root(&empty).is_none());
        assert!(proofs(&empty).is_none());
    }

    #[test]
    fn test_single_item_root_is_leaf_hash() {
        let items = items(1);
        assert_eq!(root(&items), Some(leaf_hash(&items[0])));

        let (r, proofs) = proofs(&items).unwrap();
        assert!(proofs[0].aunts.is_empty());
        proofs[0].verify(&r, &leaf_hash(&items[0])).unwrap();
    }

    #[test]
    fn test_odd_split_puts_larger_half_left() {
        let items = items(3);
        let left = inner_hash(&leaf_hash(&items[0]), &leaf_hash(&items[1]));
        let expected = inner_hash(&left, &leaf_hash(&items[2]));
        assert_eq!(root(&items), Some(expected));
    }

    #[test]
    fn test_root_is_deterministic() {
        for n in 1..40 {
            let items = items(n);
            assert_eq!(root(&items), root(&items));
        }
    }

    #[test]
    fn test_every_proof_verifies() {
        for n in 1..70 {
            let items = items(n);
            let (r, proofs) = proofs(&items).unwrap();
            assert_eq!(Some(r), root(&items));
            assert_eq!(proofs.len(), n);

            for (i, proof) in proofs.iter().enumerate() {
                assert_eq!(proof.index, i as u64);
                assert_eq!(proof.total, n as u64);
                proof.verify(&r, &leaf_hash(&items[i])).unwrap();
            }
        }
    }

    #[test]
    fn test_flipped_bytes_fail() {
        let items = items(13);
        let (r, proofs) = proofs(&items).unwrap();
        let proof = &proofs[6];
        let leaf = leaf_hash(&items[6]);

        let mut bad_root = r;
        bad_root[0] ^= 1;
        assert!(matches!(
            proof.verify(&bad_root, &leaf),
            Err(ProofError::RootMismatch { .. })
        ));

        let mut bad_leaf = proof.clone();
        bad_leaf.leaf_hash[31] ^= 1;
        assert!(bad_leaf.verify(&r, &leaf).is_err());
        assert!(bad_leaf.verify(&r, &bad_leaf.leaf_hash.clone()).is_err());

        for i in 0..proof.aunts.len() {
            let mut bad_aunt = proof.clone();
            bad_aunt.aunts[i][5] ^= 0x80;
            assert!(matches!(
                bad_aunt.verify(&r, &leaf),
                Err(ProofError::RootMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_trail_length_is_checked() {
        let items = items(9);
        let (r, proofs) = proofs(&items).unwrap();
        let leaf = leaf_hash(&items[4]);

        let mut extra = proofs[4].clone();
        extra.aunts.push([7u8; 32]);
        let err = extra.verify(&r, &leaf).unwrap_err();
        assert!(err.is_trail_length());

        let mut short = proofs[4].clone();
        short.aunts.pop();
        let err = short.verify(&r, &leaf).unwrap_err();
        assert!(err.is_trail_length());
    }

    #[test]
    fn test_bad_index_and_total() {
        let items = items(4);
        let (r, proofs) = proofs(&items).unwrap();
        let leaf = leaf_hash(&items[1]);

        let mut zero_total = proofs[1].clone();
        zero_total.total = 0;
        assert_eq!(zero_total.verify(&r, &leaf), Err(ProofError::EmptyTree));

        let mut past_end = proofs[1].clone();
        past_end.index = 4;
        assert!(matches!(
            past_end.verify(&r, &leaf),
            Err(ProofError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_reordering_changes_root() {
        let mut items = items(10);
        let before = root(&items);
        items.swap(0, 1);
        assert_ne!(before, root(&items));
    }
}
