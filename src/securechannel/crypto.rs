//! AES-128 primitives the Secure Channel is built on: single-block ECB
//! encryption (used by key derivation and SCBK diversification) and
//! CBC encryption/decryption with the caller supplying IV and padding, since
//! OSDP pads with its own `0x80`-terminator scheme (§4.1) rather than
//! PKCS#7.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Encrypt a single 16-byte block in place under `key` (AES-ECB, one block).
pub fn ecb_encrypt_block(key: &[u8; BLOCK_SIZE], block: &mut [u8; BLOCK_SIZE]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    block.copy_from_slice(ga.as_slice());
}

/// AES-128-CBC encrypt. `data.len()` must already be a multiple of
/// [`BLOCK_SIZE`] (callers pad with [`pad_osdp`] first).
pub fn cbc_encrypt(key: &[u8; BLOCK_SIZE], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Vec<u8> {
    let cipher = cbc::Encryptor::<Aes128>::new(key.into(), iv.into());
    cipher
        .encrypt_padded_vec_mut::<NoPadding>(data)
        .expect("data length is a multiple of the block size")
}

/// AES-128-CBC decrypt. `data.len()` must be a multiple of [`BLOCK_SIZE`].
pub fn cbc_decrypt(key: &[u8; BLOCK_SIZE], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Vec<u8> {
    let cipher = cbc::Decryptor::<Aes128>::new(key.into(), iv.into());
    cipher
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .expect("ciphertext length is a multiple of the block size")
}

/// Pad `data` with OSDP's terminator scheme: a single `0x80` byte followed
/// by `0x00`s up to the next 16-byte boundary. Unlike PKCS#7 this never adds
/// a full block of pure padding when `data.len()` is already block-aligned.
pub fn pad_osdp(data: &mut Vec<u8>) {
    data.push(0x80);
    while data.len() % BLOCK_SIZE != 0 {
        data.push(0x00);
    }
}

/// Strip OSDP terminator padding, returning the original unpadded length.
/// Errs (by returning `None`) if no `0x80` terminator is found in the final
/// block.
pub fn unpad_osdp(data: &[u8]) -> Option<usize> {
    data.iter().rposition(|&b| b != 0x00).filter(|&i| data[i] == 0x80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecb_block_round_trips_through_cbc_of_one_block() {
        let key = [0x2Bu8; 16];
        let iv = [0u8; 16];
        let plaintext = [0x41u8; 16];
        let ct = cbc_encrypt(&key, &iv, &plaintext);
        let pt = cbc_decrypt(&key, &iv, &ct);
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn osdp_padding_round_trips() {
        let mut data = vec![1, 2, 3];
        pad_osdp(&mut data);
        assert_eq!(data.len() % BLOCK_SIZE, 0);
        assert_eq!(unpad_osdp(&data), Some(3));
    }

    #[test]
    fn osdp_padding_on_block_aligned_input_adds_a_full_block() {
        let mut data = vec![0u8; BLOCK_SIZE];
        pad_osdp(&mut data);
        assert_eq!(data.len(), BLOCK_SIZE * 2);
        assert_eq!(unpad_osdp(&data), Some(BLOCK_SIZE));
    }
}
