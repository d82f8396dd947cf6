//! Session key derivation and cryptogram computation (§4.2).
//!
//! Session keys are each a single AES-ECB encryption, under the base key
//! (SCBK or SCBK-D), of a 16-byte block built from a per-key constant and
//! the CP's random challenge: a constant prefix plus random suffix, one
//! ECB block per derived key.

use super::crypto::{self, BLOCK_SIZE};

const DERIVE_S_ENC: u8 = 0x01;
const DERIVE_S_MAC1: u8 = 0x02;
const DERIVE_S_MAC2: u8 = 0x03;

fn derive(base_key: &[u8; BLOCK_SIZE], constant: u8, cp_random: &[u8; 8]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = constant;
    block[1] = 0x80;
    block[8..].copy_from_slice(cp_random);
    crypto::ecb_encrypt_block(base_key, &mut block);
    block
}

/// Derive `(s_enc, s_mac1, s_mac2)` from a base key and the CP's challenge.
pub fn derive_session_keys(
    base_key: &[u8; BLOCK_SIZE],
    cp_random: &[u8; 8],
) -> ([u8; BLOCK_SIZE], [u8; BLOCK_SIZE], [u8; BLOCK_SIZE]) {
    (
        derive(base_key, DERIVE_S_ENC, cp_random),
        derive(base_key, DERIVE_S_MAC1, cp_random),
        derive(base_key, DERIVE_S_MAC2, cp_random),
    )
}

/// Compute a cryptogram: AES-128-CBC (zero IV) of `first || second` under
/// `s_enc`. Used for both the CP cryptogram (`pd_random || cp_random`) and
/// the PD cryptogram (`cp_random || pd_random`); the caller picks the order.
pub fn cryptogram(s_enc: &[u8; BLOCK_SIZE], first: &[u8; 8], second: &[u8; 8]) -> [u8; BLOCK_SIZE] {
    let mut plaintext = [0u8; BLOCK_SIZE];
    plaintext[..8].copy_from_slice(first);
    plaintext[8..].copy_from_slice(second);
    let zero_iv = [0u8; BLOCK_SIZE];
    let ct = crypto::cbc_encrypt(s_enc, &zero_iv, &plaintext);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&ct);
    out
}

/// Seed the reply-MAC chain from the completed handshake: AES-ECB of the
/// bitwise complement of `s_mac1` under `s_mac2`, matching §4.1's "IV for
/// encrypt/decrypt is the inverted MAC chain value" pattern applied to seed
/// the very first chain value instead of an in-flight one.
pub fn compute_rmac_i(s_mac1: &[u8; BLOCK_SIZE], s_mac2: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        block[i] = !s_mac1[i];
    }
    crypto::ecb_encrypt_block(s_mac2, &mut block);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_keys_are_deterministic_given_same_inputs() {
        let scbk = [0x33u8; 16];
        let cp_random = [1, 2, 3, 4, 5, 6, 7, 8];
        let a = derive_session_keys(&scbk, &cp_random);
        let b = derive_session_keys(&scbk, &cp_random);
        assert_eq!(a, b);
    }

    #[test]
    fn session_keys_differ_per_purpose() {
        let scbk = [0x33u8; 16];
        let cp_random = [1, 2, 3, 4, 5, 6, 7, 8];
        let (s_enc, s_mac1, s_mac2) = derive_session_keys(&scbk, &cp_random);
        assert_ne!(s_enc, s_mac1);
        assert_ne!(s_mac1, s_mac2);
    }

    #[test]
    fn session_keys_change_with_the_challenge() {
        let scbk = [0x33u8; 16];
        let a = derive_session_keys(&scbk, &[0; 8]);
        let b = derive_session_keys(&scbk, &[1; 8]);
        assert_ne!(a, b);
    }
}
