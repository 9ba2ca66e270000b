//! Transport-layer packet format: header (de)serialization, CRC-16 header
//! checksum for pre-key pairing packets, and the CCM-style MAC used once a
//! session key is available (§4.3).

use combo_crypto::{crc16_mcrf4xx, Cipher, Nonce};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};
use crate::pdu::{Packer, Unpacker};

/// Protocol version carried by every transport packet.
pub const VERSION: u8 = 0x10;

/// Fixed header size: version(1) + flags(1) + length(2) + address(1) +
/// nonce(13).
pub const HEADER_LEN: usize = 18;

/// Size of the trailing authentication field (MAC or, before pairing
/// completes, a 6-byte zero-padded CRC residue).
pub const MAC_LEN: usize = 8;

/// Address byte used before the key exchange completes.
pub const PAIRING_ADDRESS: u8 = 0xF0;

/// Transport-layer command identifiers (5-bit field).
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum CommandId {
    Data = 0x03,
    AckResponse = 0x05,
    ErrorResponse = 0x06,
    RequestPairingConnection = 0x09,
    PairingConnectionRequestAccepted = 0x0A,
    RequestKeys = 0x0C,
    GetAvailableKeys = 0x0F,
    KeyResponse = 0x11,
    RequestId = 0x12,
    IdResponse = 0x14,
    RequestRegularConnection = 0x17,
    RegularConnectionRequestAccepted = 0x18,
    Disconnect = 0x1B,
}

impl CommandId {
    /// Returns whether this command carries the two-byte CRC-16 residue
    /// in its `payload` field instead of a CCM-style MAC, because it can
    /// be exchanged before any session key exists.
    #[must_use]
    pub const fn is_pre_key(self) -> bool {
        matches!(
            self,
            Self::RequestPairingConnection
                | Self::PairingConnectionRequestAccepted
                | Self::RequestKeys
                | Self::GetAvailableKeys
        )
    }
}

/// A decoded or to-be-encoded transport-layer packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportPacket {
    pub sequence_bit: bool,
    pub reliability_bit: bool,
    pub command_id: CommandId,
    pub address: u8,
    pub nonce: [u8; 13],
    pub payload: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl TransportPacket {
    /// Creates a new unauthenticated packet with a zeroed MAC field.
    #[must_use]
    pub fn new(command_id: CommandId, address: u8, nonce: Nonce, payload: Vec<u8>) -> Self {
        Self {
            sequence_bit: false,
            reliability_bit: false,
            command_id,
            address,
            nonce: *nonce.as_bytes(),
            payload,
            mac: [0; MAC_LEN],
        }
    }

    fn flags_byte(&self) -> u8 {
        (u8::from(self.sequence_bit) << 7)
            | (u8::from(self.reliability_bit) << 5)
            | (u8::from(self.command_id) & 0x1F)
    }

    /// Serializes the 18-byte header.
    fn header_bytes(&self) -> Vec<u8> {
        let mut p = Packer::with_capacity(HEADER_LEN);
        p.u8(VERSION)
            .u8(self.flags_byte())
            .u16(u16::try_from(self.payload.len()).expect("payload length fits in u16"))
            .u8(self.address)
            .put(&self.nonce);
        p.into_vec()
    }

    /// Serializes the packet, optionally including the payload and/or the
    /// MAC field. `encode(true, true)` is the full wire representation;
    /// `encode(true, false)` is the message authenticated by the MAC
    /// construction.
    #[must_use]
    pub fn encode(&self, with_payload: bool, with_mac: bool) -> Vec<u8> {
        let mut out = self.header_bytes();
        if with_payload {
            out.extend_from_slice(&self.payload);
        }
        if with_mac {
            out.extend_from_slice(&self.mac);
        }
        out
    }

    /// Decodes a packet from its full wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommandId`] for an unrecognized command id,
    /// and [`Error::Framing`] if the declared payload length does not
    /// match the actual buffer length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + MAC_LEN {
            return Err(Error::Framing);
        }
        let mut u = Unpacker::new(bytes);
        let _version = u.u8();
        let flags = u.u8();
        let payload_len = usize::from(u.u16());
        let address = u.u8();
        let mut nonce = [0_u8; 13];
        nonce.copy_from_slice(u.bytes(13));

        if bytes.len() != HEADER_LEN + payload_len + MAC_LEN {
            return Err(Error::Framing);
        }
        let command_id = CommandId::try_from(flags & 0x1F)
            .map_err(|_| Error::InvalidCommandId(u16::from(flags & 0x1F)))?;
        let payload = u.bytes(payload_len).to_vec();
        let mut mac = [0_u8; MAC_LEN];
        mac.copy_from_slice(u.bytes(MAC_LEN));
        if !u.ok() {
            return Err(Error::Framing);
        }
        Ok(Self {
            sequence_bit: flags & 0x80 != 0,
            reliability_bit: flags & 0x20 != 0,
            command_id,
            address,
            nonce,
            payload,
            mac,
        })
    }

    /// Computes and stores the CRC-16/MCRF4XX header checksum used by
    /// pre-key pairing packets, overwriting `payload` with the 2-byte
    /// little-endian residue. The CRC is computed as if the payload were
    /// `[0, 0]`, regardless of the payload's current contents.
    pub fn compute_crc16_payload(&mut self) {
        let mut input = self.header_bytes();
        input.extend_from_slice(&[0, 0]);
        let crc = crc16_mcrf4xx(&input);
        self.payload = crc.to_le_bytes().to_vec();
    }

    /// Verifies the CRC-16 residue written by [`Self::compute_crc16_payload`].
    /// Only meaningful when `payload.len() == 2`.
    #[must_use]
    pub fn verify_crc16_payload(&self) -> bool {
        if self.payload.len() != 2 {
            return false;
        }
        let mut input = self.header_bytes();
        input.extend_from_slice(&[0, 0]);
        let crc = crc16_mcrf4xx(&input);
        self.payload == crc.to_le_bytes()
    }

    /// Computes the CCM-style MAC over this packet's header and payload.
    #[must_use]
    pub fn compute_mac(&self, cipher: &Cipher) -> [u8; 8] {
        let nonce = Nonce::from_bytes(self.nonce);
        let message = self.encode(true, false);
        combo_crypto::compute_mac(&nonce, &message, cipher)
    }

    /// Writes the computed MAC into `self.mac`.
    pub fn authenticate(&mut self, cipher: &Cipher) {
        self.mac = self.compute_mac(cipher);
    }

    /// Verifies `self.mac` against the MAC computed from the current
    /// header, payload, and nonce, in constant time.
    #[must_use]
    pub fn verify_mac(&self, cipher: &Cipher) -> bool {
        let nonce = Nonce::from_bytes(self.nonce);
        let message = self.encode(true, false);
        combo_crypto::verify_mac(&nonce, &message, cipher, &self.mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>) -> TransportPacket {
        TransportPacket {
            sequence_bit: true,
            reliability_bit: true,
            command_id: CommandId::Data,
            address: 0x10,
            nonce: [
                1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            payload,
            mac: [0; MAC_LEN],
        }
    }

    #[test]
    fn decode_inverts_encode_for_all_payload_lengths() {
        for len in [0, 1, 2, 16, 17, 65535] {
            let packet = sample(vec![0xAB; len]);
            let wire = packet.encode(true, true);
            let decoded = TransportPacket::decode(&wire).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn unknown_command_id_is_rejected() {
        let mut packet = sample(vec![]);
        packet.command_id = CommandId::Data;
        let mut wire = packet.encode(true, true);
        // Corrupt the 5-bit command id field to an unassigned value.
        wire[1] = (wire[1] & !0x1F) | 0x1D;
        assert!(matches!(
            TransportPacket::decode(&wire),
            Err(Error::InvalidCommandId(_))
        ));
    }

    #[test]
    fn crc16_payload_round_trips_and_detects_corruption() {
        let mut packet = sample(vec![0, 0]);
        packet.command_id = CommandId::RequestPairingConnection;
        packet.address = PAIRING_ADDRESS;
        packet.nonce = [0; 13];
        packet.compute_crc16_payload();
        assert!(packet.verify_crc16_payload());

        packet.address ^= 0xFF;
        assert!(!packet.verify_crc16_payload());
    }

    #[test]
    fn mac_round_trips_and_detects_corruption() {
        let cipher = Cipher::new(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ]);
        let mut packet = sample(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        packet.authenticate(&cipher);
        assert!(packet.verify_mac(&cipher));

        packet.payload[0] ^= 0xFF;
        assert!(!packet.verify_mac(&cipher));

        packet.payload[0] ^= 0xFF;
        packet.nonce[0] ^= 0xFF;
        assert!(!packet.verify_mac(&cipher));
    }
}
