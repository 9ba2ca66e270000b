//! Combo transport cryptographic toolbox (Two-Fish block cipher, weak-key
//! derivation, CRC-16/MCRF4XX, and the CCM-style MAC construction).

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_crate_dependencies)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(variant_size_differences)]
#![warn(clippy::cargo)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::assertions_on_result_states)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::print_stdout)]
#![warn(clippy::str_to_string)]
#![warn(clippy::string_to_string)]
#![warn(clippy::todo)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub use crate::cipher::{Cipher, KEY_LEN};
pub use crate::crc::crc16_mcrf4xx;
pub use crate::mac::{compute_mac, verify_mac, Nonce, NONCE_LEN};

mod cipher;
mod crc;
mod mac;

/// Block size used by every primitive in this crate (Two-Fish's only
/// supported block size).
pub const BLOCK_LEN: usize = 16;

/// Number of decimal digits in a pairing PIN.
pub const PIN_LEN: usize = 10;

/// Derives a 16-byte weak key from a 10-digit pairing PIN.
///
/// Used solely to decrypt the two halves of a `KEY_RESPONSE` payload and
/// to verify that packet's MAC; never used for anything else and never
/// persisted.
#[must_use]
pub fn weak_key_from_pin(pin: &[u8; PIN_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0_u8; KEY_LEN];
    for (i, slot) in key.iter_mut().enumerate() {
        let digit = pin[i % PIN_LEN];
        debug_assert!(digit <= 9, "PIN digit out of range");
        // Two interleaved passes over the digits, each XORed against a
        // distinct odd mask so that the upper and lower halves of the key
        // differ even for repeating PINs.
        let mask = if i < PIN_LEN { 0xA5 } else { 0x5A };
        *slot = (digit * 10 + pin[(i + 1) % PIN_LEN]) ^ mask;
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_key_is_deterministic() {
        let pin = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];
        assert_eq!(weak_key_from_pin(&pin), weak_key_from_pin(&pin));
    }

    #[test]
    fn weak_key_differs_across_pins() {
        let a = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];
        let b = [0, 9, 8, 7, 6, 5, 4, 3, 2, 1];
        assert_ne!(weak_key_from_pin(&a), weak_key_from_pin(&b));
    }
}
