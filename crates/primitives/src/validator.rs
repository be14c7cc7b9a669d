//! Validator identities and the sorted validator group

use crate::codec;
use crate::crypto::{Address, PubKey};
use crate::error::CodecError;
use crate::hash::Hash;
use crate::merkle;
use borsh::{BorshDeserialize, BorshSerialize};
use once_cell::sync::OnceCell;

/// A validator as the supervisor knows it
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Validator {
    pub address: Address,
    pub pub_key: PubKey,
    pub staking_power: i64,
}

impl Validator {
    pub fn new(pub_key: PubKey, staking_power: i64) -> Self {
        Self {
            address: pub_key.address(),
            pub_key,
            staking_power,
        }
    }

    /// Bytes committed to by the group hash
    ///
    /// The address is left out since it is derived from the public key.
    pub fn hash_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&(self.pub_key, self.staking_power))
    }
}

/// Validators sorted by address
///
/// The total staking power is computed on first use and dropped on any
/// change to the membership.
#[derive(Debug, Clone, Default)]
pub struct ValidatorGroup {
    validators: Vec<Validator>,
    total_power: OnceCell<i64>,
}

impl ValidatorGroup {
    /// Build a group, sorting by address; later duplicates of an address are dropped
    pub fn new(validators: Vec<Validator>) -> Self {
        let mut group = Self::default();
        for validator in validators {
            group.add(validator);
        }
        group
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    fn search(&self, address: &Address) -> Result<usize, usize> {
        self.validators
            .binary_search_by(|validator| validator.address.cmp(address))
    }

    pub fn has_address(&self, address: &Address) -> bool {
        self.search(address).is_ok()
    }

    /// Index and validator for `address`
    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        let index = self.search(address).ok()?;
        Some((index, &self.validators[index]))
    }

    /// Insert in sorted position; `false` if the address is already present
    pub fn add(&mut self, validator: Validator) -> bool {
        match self.search(&validator.address) {
            Ok(_) => false,
            Err(index) => {
                self.validators.insert(index, validator);
                self.total_power = OnceCell::new();
                true
            }
        }
    }

    /// Replace the entry with the same address; `false` if absent
    pub fn update(&mut self, validator: Validator) -> bool {
        match self.search(&validator.address) {
            Ok(index) => {
                self.validators[index] = validator;
                self.total_power = OnceCell::new();
                true
            }
            Err(_) => false,
        }
    }

    /// Remove by address, keeping the rest sorted
    pub fn remove(&mut self, address: &Address) -> Option<Validator> {
        let index = self.search(address).ok()?;
        self.total_power = OnceCell::new();
        Some(self.validators.remove(index))
    }

    /// Sum of staking power, clipped to the i64 range
    pub fn total_voting_power(&self) -> i64 {
        *self.total_power.get_or_init(|| {
            self.validators
                .iter()
                .fold(0i64, |sum, validator| sum.saturating_add(validator.staking_power))
        })
    }

    /// Merkle root over every member's hash bytes, `None` for an empty group
    pub fn hash(&self) -> Result<Option<Hash>, CodecError> {
        let items = self
            .validators
            .iter()
            .map(Validator::hash_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(merkle::root(&items))
    }
}

impl PartialEq for ValidatorGroup {
    fn eq(&self, other: &Self) -> bool {
        self.validators == other.validators
    }
}

impl Eq for ValidatorGroup {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyKind, PrivKey};

    fn validator(power: i64) -> Validator {
        Validator::new(PrivKey::generate(KeyKind::Ed25519).pub_key(), power)
    }

    fn is_sorted(group: &ValidatorGroup) -> bool {
        group
            .validators()
            .windows(2)
            .all(|pair| pair[0].address < pair[1].address)
    }

    #[test]
    fn test_add_keeps_sorted_and_rejects_duplicates() {
        let mut group = ValidatorGroup::default();
        let members: Vec<Validator> = (0..12).map(|_| validator(100)).collect();
        for member in &members {
            assert!(group.add(member.clone()));
        }
        assert!(is_sorted(&group));
        assert!(!group.add(members[3].clone()));
        assert_eq!(group.len(), 12);

        for member in &members {
            assert!(group.has_address(&member.address));
            let (_, found) = group.get_by_address(&member.address).unwrap();
            assert_eq!(found, member);
        }
    }

    #[test]
    fn test_update_and_remove() {
        let a = validator(10);
        let b = validator(20);
        let mut group = ValidatorGroup::new(vec![a.clone(), b.clone()]);
        assert_eq!(group.total_voting_power(), 30);

        let mut bigger = a.clone();
        bigger.staking_power = 50;
        assert!(group.update(bigger));
        assert_eq!(group.total_voting_power(), 70);
        assert!(!group.update(validator(1)));

        assert_eq!(group.remove(&b.address), Some(b.clone()));
        assert_eq!(group.remove(&b.address), None);
        assert_eq!(group.total_voting_power(), 50);
        assert!(!group.has_address(&b.address));
    }

    #[test]
    fn test_total_power_saturates() {
        let group = ValidatorGroup::new(vec![validator(i64::MAX), validator(i64::MAX)]);
        assert_eq!(group.total_voting_power(), i64::MAX);

        let group = ValidatorGroup::new(vec![validator(i64::MIN), validator(-5)]);
        assert_eq!(group.total_voting_power(), i64::MIN);
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let members: Vec<Validator> = (0..5).map(|_| validator(100)).collect();
        let mut reversed = members.clone();
        reversed.reverse();

        let a = ValidatorGroup::new(members).hash().unwrap();
        let b = ValidatorGroup::new(reversed).hash().unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_group_hash_is_none() {
        assert_eq!(ValidatorGroup::default().hash().unwrap(), None);
    }
}
