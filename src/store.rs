//! Persisted pairing state (§4.6, §5): the long-lived keys and nonce a
//! session needs to resume without re-pairing.

use combo_crypto::{Nonce, NONCE_LEN};

use crate::error::{Error, Result};
use crate::pdu::{Packer, Unpacker};

/// The two session keys and bound address negotiated once during pairing.
#[derive(Clone, Eq, PartialEq)]
pub struct PairingData {
    pub client_pump_key: [u8; 16],
    pub pump_client_key: [u8; 16],
    pub key_response_address: u8,
}

impl std::fmt::Debug for PairingData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingData")
            .field("key_response_address", &self.key_response_address)
            .finish_non_exhaustive()
    }
}

/// Fixed on-disk record length: two 16-byte keys, one address byte, and a
/// 13-byte nonce.
const RECORD_LEN: usize = 16 + 16 + 1 + NONCE_LEN;

/// Everything that must survive between sessions once pairing completes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistentPumpState {
    pub pairing_data: PairingData,
    pub current_tx_nonce: Nonce,
}

impl PersistentPumpState {
    /// Returns whether this record looks usable: neither session key is
    /// all zero bytes, which would indicate a corrupt or never-written
    /// record rather than a genuinely paired one.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.pairing_data.client_pump_key != [0; 16] && self.pairing_data.pump_client_key != [0; 16]
    }

    /// Serializes this state for storage.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut p = Packer::with_capacity(RECORD_LEN);
        p.put(&self.pairing_data.client_pump_key)
            .put(&self.pairing_data.pump_client_key)
            .u8(self.pairing_data.key_response_address)
            .put(self.current_tx_nonce.as_bytes());
        p.into_vec()
    }

    /// Deserializes state previously written by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if `bytes` is not exactly
    /// [`RECORD_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_LEN {
            return Err(Error::Storage(format!(
                "persisted pump state has wrong length: {} (expected {RECORD_LEN})",
                bytes.len()
            )));
        }
        let mut u = Unpacker::new(bytes);
        let mut client_pump_key = [0_u8; 16];
        client_pump_key.copy_from_slice(u.bytes(16));
        let mut pump_client_key = [0_u8; 16];
        pump_client_key.copy_from_slice(u.bytes(16));
        let key_response_address = u.u8();
        let mut nonce = [0_u8; NONCE_LEN];
        nonce.copy_from_slice(u.bytes(NONCE_LEN));
        Ok(Self {
            pairing_data: PairingData {
                client_pump_key,
                pump_client_key,
                key_response_address,
            },
            current_tx_nonce: Nonce::from_bytes(nonce),
        })
    }
}

/// Persistence backend for [`PersistentPumpState`]. Implementations may
/// back this with a file, a keychain entry, or an in-memory map in tests.
#[async_trait::async_trait]
pub trait PumpStateStore: Send + Sync {
    /// Returns whether state has been stored for `device`.
    async fn has_state(&self, device: &str) -> Result<bool>;

    /// Loads the full persisted state for `device`.
    async fn load(&self, device: &str) -> Result<PersistentPumpState>;

    /// Persists the full state for `device`, replacing any prior record.
    async fn store(&self, device: &str, state: &PersistentPumpState) -> Result<()>;

    /// Loads only the current transmit nonce, for the common case of
    /// updating it after every authenticated packet without rewriting the
    /// pairing keys.
    async fn load_nonce(&self, device: &str) -> Result<Nonce>;

    /// Persists only the current transmit nonce.
    async fn store_nonce(&self, device: &str, nonce: Nonce) -> Result<()>;

    /// Deletes any persisted state for `device`, forcing re-pairing.
    async fn delete(&self, device: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_bytes() {
        let state = PersistentPumpState {
            pairing_data: PairingData {
                client_pump_key: [1; 16],
                pump_client_key: [2; 16],
                key_response_address: 0x10,
            },
            current_tx_nonce: Nonce::one(),
        };
        let bytes = state.to_bytes();
        assert_eq!(PersistentPumpState::from_bytes(&bytes).unwrap(), state);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(PersistentPumpState::from_bytes(&[0; 4]).is_err());
    }

    #[test]
    fn zeroed_keys_are_invalid() {
        let state = PersistentPumpState {
            pairing_data: PairingData {
                client_pump_key: [0; 16],
                pump_client_key: [0; 16],
                key_response_address: 0,
            },
            current_tx_nonce: Nonce::one(),
        };
        assert!(!state.is_valid());
    }
}
