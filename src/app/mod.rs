//! Application-layer packet: command multiplexing embedded in transport
//! `DATA` payloads (§4.4), RT button codes, and the RT display codec.

pub use commands::{AppCommand, ServiceId};
pub use rt::{DisplayFrame, RtButton, RtButtonStatus, RtDisplay};

use combo_crypto::Nonce;

use crate::error::{Error, Result};
use crate::pdu::{Packer, Unpacker};
use crate::transport::{CommandId, TransportPacket};

mod commands;
mod rt;

/// Protocol version carried by every application packet.
pub const VERSION: u8 = 0x10;

/// Application-layer header size: version(1) + service_id(1) +
/// command_id(2).
const HEADER_LEN: usize = 4;

/// A decoded or to-be-encoded application-layer packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppPacket {
    pub command: AppCommand,
    pub payload: Vec<u8>,
}

impl AppPacket {
    /// Creates a new application packet.
    #[must_use]
    pub fn new(command: AppCommand, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Serializes to the bytes carried by a transport `DATA` payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut p = Packer::with_capacity(HEADER_LEN + self.payload.len());
        p.u8(VERSION)
            .u8(self.command.service_id().into())
            .u16(self.command.command_id())
            .put(&self.payload);
        p.into_vec()
    }

    /// Decodes an application packet from a transport `DATA` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommandId`] if the (service, command)
    /// pair is not in the command table.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidPayload("application packet shorter than header"));
        }
        let mut u = Unpacker::new(bytes);
        let _version = u.u8();
        let service_byte = u.u8();
        let command_id = u.u16();
        let service_id = ServiceId::try_from(service_byte)
            .map_err(|_| Error::InvalidCommandId(u16::from(service_byte)))?;
        let command = AppCommand::from_ids(service_id, command_id)
            .ok_or(Error::InvalidCommandId(command_id))?;
        Ok(Self {
            command,
            payload: u.bytes(u.remaining()).to_vec(),
        })
    }

    /// Wraps this application packet in a transport `DATA` packet, ready
    /// for MAC authentication, setting the reliability bit from the
    /// command's table entry.
    #[must_use]
    pub fn into_transport_packet(self, address: u8, nonce: Nonce) -> TransportPacket {
        let mut packet =
            TransportPacket::new(CommandId::Data, address, nonce, self.encode());
        packet.reliability_bit = self.command.reliable();
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_inverts_encode() {
        let app = AppPacket::new(AppCommand::CtrlConnect, vec![1, 2, 3]);
        let decoded = AppPacket::decode(&app.encode()).unwrap();
        assert_eq!(decoded, app);
    }

    #[test]
    fn reliability_bit_follows_command_table() {
        let rt = AppPacket::new(AppCommand::RtButtonStatus, vec![]);
        let packet = rt.into_transport_packet(0x10, Nonce::one());
        assert!(!packet.reliability_bit);

        let ctrl = AppPacket::new(AppCommand::CtrlConnect, vec![]);
        let packet = ctrl.into_transport_packet(0x10, Nonce::one());
        assert!(packet.reliability_bit);
    }
}
