//! Keystream XOR used to obfuscate (not authenticate) the classification catalog.
//!
//! The key is mixed into a 32-bit FNV-1a hash, then treated as a
//! linear-congruential generator that emits a 100000-byte keystream
//! block; encryption and decryption are the same XOR operation. This is
//! a format-obfuscation layer, not an authenticated cipher, and must not
//! be reused for anything else.

use std::io;

/// Length of one keystream block; the same seed is reused for every
/// block, so any 100000-byte window of a longer stream repeats.
pub const BLOCK_LEN: usize = 100_000;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;
const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;
const WORD_BYTES: usize = 4;

/// Mixes `key` into a 32-bit seed using FNV-1a over 4-byte chunks of the key.
///
/// `x |= c.wrapping_mul(0xff << (j*8))` multiplies rather than shifts the
/// byte into position, which discards bits beyond the lowest byte of
/// each multiply. Kept verbatim rather than "fixed": it's unclear
/// whether this is intentional obfuscation or a latent bug, and
/// correcting it would silently change the keystream for every
/// previously encrypted catalog.
fn mix_key(key: &str) -> u32 {
    let bytes = key.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        let mut x: u32 = 0;
        let mut j = 0;
        while j < WORD_BYTES && i + j < bytes.len() {
            let c = bytes[i + j] as u32;
            let shift = (j * 8) as u32;
            x |= c.wrapping_mul(0xffu32.wrapping_shl(shift));
            j += 1;
        }
        hash ^= x;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += j;
    }
    hash
}

/// Fills an `n`-byte keystream block for `key`.
///
/// Byte-identical across platforms: the LCG and emitted byte order are
/// fixed at 32 bits / little-endian regardless of host word size or
/// endianness.
pub fn fill_block(key: &str, n: usize) -> Vec<u8> {
    let mut hash = mix_key(key);
    let mut out = vec![0u8; n];
    let mut i = 0;
    while i < n {
        let word = hash.to_le_bytes();
        let mut j = 0;
        while j < WORD_BYTES && i + j < n {
            out[i + j] = word[j];
            j += 1;
        }
        hash = hash.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        i += WORD_BYTES;
    }
    out
}

/// XORs `data` against a repeating `BLOCK_LEN`-byte keystream derived from `key`.
/// Self-inverse: the same call encrypts or decrypts.
pub fn xor_with_keystream(data: &[u8], key: &str) -> Vec<u8> {
    let keystream = fill_block(key, BLOCK_LEN);
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ keystream[i % BLOCK_LEN])
        .collect()
}

/// Prompts for a key on the controlling terminal with local echo disabled.
pub fn prompt_key() -> io::Result<String> {
    rpassword::prompt_password("Enter encryption key: ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_block_is_deterministic() {
        let a = fill_block("abc", 64);
        let b = fill_block("abc", 64);
        assert_eq!(a, b);
        let c = fill_block("abd", 64);
        assert_ne!(a, c);
    }

    #[test]
    fn xor_round_trips_with_same_key() {
        let plaintext: Vec<u8> = (0..250_000u32).map(|i| (i % 251) as u8).collect();
        let ciphertext = xor_with_keystream(&plaintext, "abc");
        assert_ne!(ciphertext, plaintext);
        let decrypted = xor_with_keystream(&ciphertext, "abc");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_yields_different_same_length_output() {
        let plaintext = vec![0u8; 1000];
        let a = xor_with_keystream(&plaintext, "abc");
        let b = xor_with_keystream(&plaintext, "abd");
        assert_eq!(a.len(), b.len());
        assert_ne!(a, b);
    }

    #[test]
    fn keystream_repeats_every_block_len_bytes() {
        let keystream = fill_block("k", BLOCK_LEN * 2);
        assert_eq!(&keystream[..BLOCK_LEN], &keystream[BLOCK_LEN..]);
    }
}
