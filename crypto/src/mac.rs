use subtle::ConstantTimeEq;

use crate::{Cipher, BLOCK_LEN};

/// Length in bytes of the transport nonce.
pub const NONCE_LEN: usize = 13;

/// 13-byte little-endian counter nonce. Incremented once per outgoing
/// MAC-authenticated packet; never reused for a given key.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Creates a nonce from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(b: [u8; NONCE_LEN]) -> Self {
        Self(b)
    }

    /// Returns the nonce that marks the start of authenticated traffic
    /// (value 1, set after the first `REQUEST_ID`).
    #[inline]
    #[must_use]
    pub const fn one() -> Self {
        let mut b = [0_u8; NONCE_LEN];
        b[0] = 1;
        Self(b)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Increments the counter by one with carry, little-endian.
    pub fn increment(&mut self) {
        for byte in &mut self.0 {
            let (v, carry) = byte.overflowing_add(1);
            *byte = v;
            if !carry {
                return;
            }
        }
    }
}

/// Computes the CCM-style MAC over `message` (the packet header and
/// payload, MAC field excluded) using `nonce` and `cipher`.
#[must_use]
pub fn compute_mac(nonce: &Nonce, message: &[u8], cipher: &Cipher) -> [u8; 8] {
    let mut x = b0_block(0x79, nonce);
    cipher.encrypt_block(&mut x);

    let mut chunks = message.chunks_exact(BLOCK_LEN);
    for block in &mut chunks {
        xor_into(&mut x, block);
        cipher.encrypt_block(&mut x);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let r = rem.len();
        xor_into(&mut x[..r], rem);
        let pad = u8::try_from(BLOCK_LEN - r).expect("BLOCK_LEN - r fits in u8");
        for b in &mut x[r..] {
            *b ^= pad;
        }
        cipher.encrypt_block(&mut x);
    }
    let mut u = [0_u8; 8];
    u.copy_from_slice(&x[..8]);

    let mut x1 = b0_block(0x41, nonce);
    cipher.encrypt_block(&mut x1);

    let mut mac = [0_u8; 8];
    for i in 0..8 {
        mac[i] = u[i] ^ x1[i];
    }
    mac
}

/// Verifies `mac` against the MAC computed over `message`, in constant time.
#[must_use]
pub fn verify_mac(nonce: &Nonce, message: &[u8], cipher: &Cipher, mac: &[u8; 8]) -> bool {
    let expected = compute_mac(nonce, message, cipher);
    bool::from(expected.ct_eq(mac))
}

fn b0_block(leading: u8, nonce: &Nonce) -> [u8; BLOCK_LEN] {
    let mut b0 = [0_u8; BLOCK_LEN];
    b0[0] = leading;
    b0[1..1 + NONCE_LEN].copy_from_slice(nonce.as_bytes());
    b0
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_increments_with_carry() {
        let mut n = Nonce::from_bytes([0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        n.increment();
        assert_eq!(n.as_bytes(), &[0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn nonce_one_matches_first_tx_value() {
        let one = Nonce::one();
        assert_eq!(one.as_bytes()[0], 1);
        assert!(one.as_bytes()[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn mac_is_deterministic_and_sensitive_to_every_byte() {
        let cipher = Cipher::new(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ]);
        let nonce = Nonce::one();
        let msg = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03];
        let mac = compute_mac(&nonce, &msg, &cipher);
        assert!(verify_mac(&nonce, &msg, &cipher, &mac));

        let mut bad = msg;
        bad[0] ^= 0xFF;
        assert!(!verify_mac(&nonce, &bad, &cipher, &mac));

        let mut bad_nonce = nonce;
        bad_nonce.increment();
        assert!(!verify_mac(&bad_nonce, &msg, &cipher, &mac));

        let mut bad_mac = mac;
        bad_mac[0] ^= 1;
        assert!(!verify_mac(&nonce, &msg, &cipher, &bad_mac));
    }
}
