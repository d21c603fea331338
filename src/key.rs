use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::KEY_LENGTH;

/// A 160-bit key that identifies both nodes and stored values.
///
/// Byte 0 is the most significant byte, so the derived ordering is the numeric ordering of the
/// key and comparing two XOR results compares their distances.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let hex_vec: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", hex_vec.join(""))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::from_hex(s)
    }
}

impl Key {
    /// Constructs a new `Key` from a byte array.
    pub fn new(data: [u8; KEY_LENGTH]) -> Self {
        Key(data)
    }

    /// Constructs a new, random `Key`.
    pub fn rand() -> Self {
        Key(rand::thread_rng().gen())
    }

    /// Parses a key from exactly `2 * KEY_LENGTH` hex digits. Shorter or longer input is rejected
    /// rather than padded or truncated.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::MalformedIdentifier(s.to_string()))?;
        if bytes.len() != KEY_LENGTH {
            return Err(Error::MalformedIdentifier(s.to_string()));
        }
        let mut ret = [0; KEY_LENGTH];
        ret.copy_from_slice(&bytes);
        Ok(Key(ret))
    }

    /// Constructs a new, random `Key` from `[2^(KEY_LENGTH * 8 - index - 1), 2^(KEY_LENGTH * 8 - index))`.
    #[cfg(test)]
    pub(crate) fn rand_in_range(index: usize) -> Self {
        let mut ret = Key::rand();
        let bytes = index / 8;
        let bit = index % 8;
        for i in 0..bytes {
            ret.0[i] = 0;
        }
        ret.0[bytes] &= 0xFF >> (bit);
        ret.0[bytes] |= 1 << (8 - bit - 1);
        ret
    }

    /// Returns the XOR result between `self` and `key`.
    pub fn xor(&self, key: &Key) -> Key {
        let mut ret = [0; KEY_LENGTH];
        for (i, byte) in ret.iter_mut().enumerate() {
            *byte = self.0[i] ^ key.0[i];
        }
        Key(ret)
    }

    /// Returns the number of leading zeros in `self`. Applied to a distance, this is the length
    /// of the prefix the two keys share.
    pub fn leading_zeros(&self) -> usize {
        let mut ret = 0;
        for i in 0..KEY_LENGTH {
            if self.0[i] == 0 {
                ret += 8
            } else {
                return ret + self.0[i].leading_zeros() as usize;
            }
        }
        ret
    }

    /// Returns the position of the most significant set bit, counted from the low-order end, or
    /// `None` for the zero key. Applied to a distance, this is the index of the k-bucket the
    /// other key belongs in.
    pub fn bucket_index(&self) -> Option<usize> {
        let zeros = self.leading_zeros();
        if zeros == KEY_LENGTH * 8 {
            None
        } else {
            Some(KEY_LENGTH * 8 - 1 - zeros)
        }
    }

    /// Returns `true` if bit `index`, counted from the low-order end, is set.
    pub fn bit(&self, index: usize) -> bool {
        let byte = KEY_LENGTH - 1 - index / 8;
        (self.0[byte] >> (index % 8)) & 1 == 1
    }
}
