//! Self-destructing data.
//!
//! A payload is encrypted under a fresh random key and the key is split into `N` shares of
//! which any `T` recover it. The resulting `VanishingDataObject` carries the ciphertext and a
//! local copy of the shares; the node layer additionally scatters the shares over the DHT at
//! locations derived from the object's access key, so the data becomes unreadable once those
//! copies are gone.

pub mod shamir;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::{Rng, RngCore};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::KEY_LENGTH;

/// The length of the symmetric key in bytes.
const CRYPTO_KEY_LENGTH: usize = 32;

/// The length of the nonce prepended to the ciphertext.
const NONCE_LENGTH: usize = 12;

/// One share of a split key, tagged with its 1-based index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyShare {
    pub index: u8,
    pub data: Vec<u8>,
}

impl KeyShare {
    /// Encodes the share as its index followed by its data, the form stored in the DHT.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(self.data.len() + 1);
        ret.push(self.index);
        ret.extend_from_slice(&self.data);
        ret
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<KeyShare> {
        let (&index, data) = bytes.split_first()?;
        Some(KeyShare {
            index,
            data: data.to_vec(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VanishingDataObject {
    /// Seed from which the DHT locations of the shares are derived.
    pub access_key: u64,
    /// Nonce followed by the AES-256-GCM ciphertext and tag.
    pub ciphertext: Vec<u8>,
    pub number_keys: u8,
    pub threshold: u8,
    /// Local copy of the shares.
    pub shares: Vec<KeyShare>,
}

/// Returns the `count` DHT keys at which the shares of an object with `access_key` live. Share
/// `i` (1-based) is stored at the `i - 1`th key.
pub fn share_locations(access_key: u64, count: u8) -> Vec<Key> {
    (1..=count)
        .map(|index| {
            let mut hasher = Sha3_256::new();
            hasher.update(access_key.to_be_bytes());
            hasher.update([index]);
            let digest = hasher.finalize();
            let mut ret = [0; KEY_LENGTH];
            ret.copy_from_slice(&digest[..KEY_LENGTH]);
            Key(ret)
        })
        .collect()
}

fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto("invalid key length"))?;
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Crypto("encryption failed"))?;
    let mut ret = nonce.to_vec();
    ret.extend(ciphertext);
    Ok(ret)
}

fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_LENGTH {
        return Err(Error::Crypto("ciphertext is not long enough"));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto("invalid key length"))?;
    let (nonce, ciphertext) = ciphertext.split_at(NONCE_LENGTH);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("decryption failed"))
}

/// Encrypts `payload` and splits the key into `number_keys` shares with the given `threshold`.
pub fn vanish_data(payload: &[u8], number_keys: u8, threshold: u8) -> Result<VanishingDataObject> {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; CRYPTO_KEY_LENGTH];
    rng.fill_bytes(&mut key);

    let shares = shamir::split(&key, number_keys, threshold)?;
    let ciphertext = encrypt(&key, payload)?;

    Ok(VanishingDataObject {
        access_key: rng.gen(),
        ciphertext,
        number_keys,
        threshold,
        shares,
    })
}

/// Recovers the payload of `vdo` from `shares`.
///
/// Shares with an index outside `1..=number_keys` or of the wrong length are ignored and the
/// first share seen for each index wins. Fails with `InsufficientShares` if fewer than
/// `threshold` distinct shares remain.
pub fn unvanish_data(vdo: &VanishingDataObject, shares: &[KeyShare]) -> Result<Vec<u8>> {
    let mut distinct = BTreeMap::new();
    for share in shares {
        if share.index == 0 || share.index > vdo.number_keys {
            continue;
        }
        if share.data.len() != CRYPTO_KEY_LENGTH {
            continue;
        }
        distinct.entry(share.index).or_insert_with(|| share.clone());
    }

    if vdo.threshold == 0 || distinct.len() < vdo.threshold as usize {
        return Err(Error::InsufficientShares {
            needed: vdo.threshold,
            found: distinct.len(),
        });
    }

    let chosen: Vec<KeyShare> = distinct
        .into_iter()
        .map(|(_, share)| share)
        .take(vdo.threshold as usize)
        .collect();
    let key = shamir::combine(&chosen);
    decrypt(&key, &vdo.ciphertext)
}

#[cfg(test)]
mod tests {
    use super::{share_locations, unvanish_data, vanish_data, KeyShare};
    use crate::error::Error;

    #[test]
    fn test_any_three_of_five() {
        let vdo = vanish_data(b"hello world", 5, 3).unwrap();
        assert_eq!(vdo.shares.len(), 5);
        let indices: Vec<u8> = vdo.shares.iter().map(|share| share.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);

        for a in 0..5 {
            for b in a + 1..5 {
                for c in b + 1..5 {
                    let subset = [
                        vdo.shares[a].clone(),
                        vdo.shares[b].clone(),
                        vdo.shares[c].clone(),
                    ];
                    assert_eq!(unvanish_data(&vdo, &subset).unwrap(), b"hello world");
                }
            }
        }
    }

    #[test]
    fn test_two_of_five_fails() {
        let vdo = vanish_data(b"hello world", 5, 3).unwrap();
        match unvanish_data(&vdo, &vdo.shares[1..3]) {
            Err(Error::InsufficientShares { needed: 3, found: 2 }) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_shares_count_once() {
        let vdo = vanish_data(b"hello world", 5, 3).unwrap();
        let shares = [
            vdo.shares[0].clone(),
            vdo.shares[0].clone(),
            vdo.shares[4].clone(),
        ];
        match unvanish_data(&vdo, &shares) {
            Err(Error::InsufficientShares { found: 2, .. }) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_foreign_shares_do_not_yield_plaintext() {
        let vdo = vanish_data(b"hello world", 5, 3).unwrap();
        let other = vanish_data(b"something else", 5, 3).unwrap();
        match unvanish_data(&vdo, &other.shares) {
            Err(Error::Crypto(_)) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_payload() {
        let vdo = vanish_data(b"", 1, 1).unwrap();
        assert_eq!(unvanish_data(&vdo, &vdo.shares).unwrap(), b"");
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(vanish_data(b"data", 2, 3).is_err());
        assert!(vanish_data(b"data", 2, 0).is_err());
    }

    #[test]
    fn test_share_bytes() {
        let share = KeyShare {
            index: 4,
            data: vec![1, 2, 3],
        };
        assert_eq!(share.to_bytes(), vec![4, 1, 2, 3]);
        assert_eq!(KeyShare::from_bytes(&share.to_bytes()), Some(share));
        assert_eq!(KeyShare::from_bytes(&[]), None);
    }

    #[test]
    fn test_share_locations_are_deterministic() {
        let locations = share_locations(42, 5);
        assert_eq!(locations.len(), 5);
        assert_eq!(locations, share_locations(42, 5));
        assert_ne!(locations, share_locations(43, 5));
        assert_ne!(locations[0], locations[1]);
    }
}
