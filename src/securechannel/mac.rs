//! OSDP's two-key chained CBC-MAC (§4.1/§4.2): every block but the last is
//! chained under `s_mac1`, the last block under `s_mac2`; the tag is the
//! final 4 bytes of the resulting chain value.

use super::crypto::{self, BLOCK_SIZE};
use std::fmt;
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroize;

/// Size of a MAC tag in bytes
pub const MAC_SIZE: usize = 4;

/// A MAC tag, compared only in constant time.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Mac([u8; MAC_SIZE]);

impl Mac {
    /// Wrap a 4-byte tag
    pub fn from_bytes(bytes: [u8; MAC_SIZE]) -> Self {
        Mac(bytes)
    }

    /// Borrow the tag as a slice
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl ConstantTimeEq for Mac {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Mac {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Mac {}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac(..)")
    }
}

/// Advance a MAC chain over `data`, returning the new 16-byte chain value.
/// `data` is zero-padded (OSDP `0x80` terminator) to a block boundary before
/// chaining; the final block is encrypted under `mac_key2` and every prior
/// block under `mac_key1`.
pub fn chain(
    mac_key1: &[u8; BLOCK_SIZE],
    mac_key2: &[u8; BLOCK_SIZE],
    chain_value: &[u8; BLOCK_SIZE],
    data: &[u8],
) -> [u8; BLOCK_SIZE] {
    let mut padded = data.to_vec();
    crypto::pad_osdp(&mut padded);

    let mut state = *chain_value;
    let num_blocks = padded.len() / BLOCK_SIZE;
    for (i, block) in padded.chunks_exact(BLOCK_SIZE).enumerate() {
        let key = if i + 1 == num_blocks { mac_key2 } else { mac_key1 };
        let mut xored = [0u8; BLOCK_SIZE];
        for j in 0..BLOCK_SIZE {
            xored[j] = state[j] ^ block[j];
        }
        crypto::ecb_encrypt_block(key, &mut xored);
        state = xored;
    }
    state
}

/// Truncate a 16-byte chain value to its 4-byte MAC tag.
pub fn tag(chain_value: &[u8; BLOCK_SIZE]) -> Mac {
    let mut bytes = [0u8; MAC_SIZE];
    bytes.copy_from_slice(&chain_value[BLOCK_SIZE - MAC_SIZE..]);
    Mac::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_deterministic() {
        let k1 = [0x01u8; 16];
        let k2 = [0x02u8; 16];
        let iv = [0u8; 16];
        let a = chain(&k1, &k2, &iv, b"poll");
        let b = chain(&k1, &k2, &iv, b"poll");
        assert_eq!(a, b);
    }

    #[test]
    fn chain_is_sensitive_to_single_bit_flips() {
        let k1 = [0x01u8; 16];
        let k2 = [0x02u8; 16];
        let iv = [0u8; 16];
        let a = tag(&chain(&k1, &k2, &iv, b"command-data"));
        let b = tag(&chain(&k1, &k2, &iv, b"Command-data"));
        assert_ne!(a, b);
    }
}
