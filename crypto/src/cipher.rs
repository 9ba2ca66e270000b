use ::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;

use crate::BLOCK_LEN;

/// Size of a Two-Fish key in bytes.
pub const KEY_LEN: usize = 16;

/// A 128-bit Two-Fish key, operated in raw ECB single-block mode. The
/// protocol never chains blocks through the cipher itself; block chaining
/// is done explicitly by the CCM-style MAC construction in [`crate::mac`].
#[derive(Clone)]
pub struct Cipher(Twofish);

impl Cipher {
    /// Creates a cipher from a 16-byte key.
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self(Twofish::new(key.into()))
    }

    /// Encrypts a single 16-byte block in place.
    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let mut ga = (*block).into();
        self.0.encrypt_block(&mut ga);
        *block = ga.into();
    }

    /// Decrypts a single 16-byte block in place.
    pub fn decrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let mut ga = (*block).into();
        self.0.decrypt_block(&mut ga);
        *block = ga.into();
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let cipher = Cipher::new(&[0x42; KEY_LEN]);
        let mut block = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let orig = block;
        cipher.encrypt_block(&mut block);
        assert_ne!(block, orig);
        cipher.decrypt_block(&mut block);
        assert_eq!(block, orig);
    }
}
