//! Initial pairing flow (§4.6): weak-PIN cipher, key exchange,
//! identification, a full regular-connection/service-version/bind cycle,
//! and the final disconnect that leaves the pump ready for the caller's
//! own first regular connect.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use combo_crypto::{weak_key_from_pin, Cipher, Nonce, PIN_LEN};

use crate::address::{swap_nibbles, PairingPin};
use crate::app::{AppCommand, AppPacket, ServiceId};
use crate::error::{Error, Result};
use crate::pdu::Packer;
use crate::session::{Inbound, SessionEngine};
use crate::store::{PairingData, PersistentPumpState};
use crate::transport::{CommandId, TransportPacket, PAIRING_ADDRESS};

/// Longest Bluetooth friendly name the `REQUEST_ID` payload carries;
/// longer names are truncated to fit the fixed-width field (§4.6 step 4).
const FRIENDLY_NAME_LEN: usize = 13;

/// Outcome of decrypting and checking a `KEY_RESPONSE` payload against a
/// candidate PIN. Modeled as data rather than an error variant so the PIN
/// retry loop (§4.6 step 6) is a plain match, not exception-driven
/// control flow.
#[derive(Debug)]
pub enum KeyVerifyResult {
    /// The PIN decrypted a structurally valid key response.
    Ok(PairingData),
    /// The PIN was wrong: the response's MAC did not verify under the
    /// derived weak key. The caller should re-prompt for the PIN.
    WrongPin,
    /// The response was the wrong length or otherwise malformed,
    /// independent of the PIN. Not retryable.
    Corrupt,
}

/// Drives one full pairing exchange against a freshly connected,
/// unauthenticated [`SessionEngine`].
pub struct PairingFlow {
    session: Arc<SessionEngine>,
}

const KEY_RESPONSE_PAYLOAD_LEN: usize = 32;

impl PairingFlow {
    /// Wraps a session engine whose transport is already connected but
    /// has no session key installed.
    #[must_use]
    pub const fn new(session: Arc<SessionEngine>) -> Self {
        Self { session }
    }

    /// Runs the full pairing exchange (§4.6 steps 1-10), prompting for a
    /// PIN through `get_pin` and retrying on [`KeyVerifyResult::WrongPin`]
    /// up to `max_pin_attempts` times. `client_version` and `device_name`
    /// go into the `REQUEST_ID` payload the pump uses to identify this
    /// client on later reconnects.
    ///
    /// Leaves the session disconnected (post `CTRL_DISCONNECT`) on
    /// success, with the returned state ready to hand to
    /// [`crate::connect::ConnectFlow::connect`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails, the pump rejects the
    /// pairing attempt, or every PIN attempt is exhausted.
    #[instrument(skip(self, get_pin))]
    pub async fn run<F>(
        &self,
        max_pin_attempts: u32,
        client_version: u32,
        device_name: &str,
        mut get_pin: F,
    ) -> Result<PersistentPumpState>
    where
        F: FnMut() -> Result<PairingPin>,
    {
        let mut raw = self
            .session
            .take_raw_receiver()
            .ok_or_else(|| Error::SessionClosed("raw receiver already taken".into()))?;
        let mut control = self
            .session
            .take_control_receiver()
            .ok_or_else(|| Error::SessionClosed("control receiver already taken".into()))?;

        self.request_pairing_connection(&mut raw).await?;
        self.request_keys().await?;
        let key_response = self.request_available_keys(&mut raw).await?;

        let mut pairing_data = None;
        for attempt in 1..=max_pin_attempts {
            let pin = get_pin()?;
            match Self::verify_key_response(&key_response, &pin) {
                KeyVerifyResult::Ok(data) => {
                    pairing_data = Some(data);
                    break;
                }
                KeyVerifyResult::WrongPin => {
                    debug!(attempt, "PIN rejected, retrying");
                    continue;
                }
                KeyVerifyResult::Corrupt => {
                    return Err(Error::InvalidPayload("KEY_RESPONSE payload malformed"));
                }
            }
        }
        let pairing_data = pairing_data.ok_or(Error::InvalidPayload("PIN attempts exhausted"))?;

        let negotiated_state = PersistentPumpState {
            pairing_data: pairing_data.clone(),
            current_tx_nonce: Nonce::one(),
        };
        self.session.install_pairing_data(&negotiated_state);
        self.session.set_address(pairing_data.key_response_address);
        self.session.set_tx_nonce(Nonce::one());
        // From here on, the persisted record must reflect reality before
        // any further packet goes out (§4.6 step 4).
        self.session.commit_state(&negotiated_state).await?;

        self.request_id(&mut raw, client_version, device_name).await?;

        // Steps 5-9: a full regular-connection cycle through COMMAND_MODE
        // to fetch the service version, binding the new key, then
        // dropping back to a clean disconnected state for the caller's
        // own first `ConnectFlow::connect`.
        self.request_regular_connection(&mut raw).await?;
        self.ctrl_connect(&mut control).await?;
        self.ctrl_get_service_version(&mut control, ServiceId::CommandMode)
            .await?;
        self.bind(&mut control).await?;
        self.request_regular_connection(&mut raw).await?;
        self.ctrl_disconnect().await?;

        let final_state = PersistentPumpState {
            pairing_data,
            current_tx_nonce: self.session.current_tx_nonce(),
        };
        self.session.commit_state(&final_state).await?;
        info!("pairing complete");
        Ok(final_state)
    }

    async fn recv_raw(&self, raw: &mut mpsc::UnboundedReceiver<TransportPacket>) -> Result<TransportPacket> {
        raw.recv().await.ok_or_else(|| {
            self.session
                .session_error()
                .unwrap_or_else(|| Error::SessionClosed("transport closed during pairing".into()))
        })
    }

    async fn request_pairing_connection(
        &self,
        raw: &mut mpsc::UnboundedReceiver<TransportPacket>,
    ) -> Result<()> {
        self.session
            .send_transport(CommandId::RequestPairingConnection, vec![0, 0])
            .await?;
        let reply = self.recv_raw(raw).await?;
        if reply.command_id != CommandId::PairingConnectionRequestAccepted {
            return Err(Error::IncorrectPacket);
        }
        Ok(())
    }

    async fn request_keys(&self) -> Result<()> {
        self.session
            .send_transport(CommandId::RequestKeys, vec![0, 0])
            .await
    }

    async fn request_available_keys(
        &self,
        raw: &mut mpsc::UnboundedReceiver<TransportPacket>,
    ) -> Result<TransportPacket> {
        self.session
            .send_transport(CommandId::GetAvailableKeys, vec![0, 0])
            .await?;
        let reply = self.recv_raw(raw).await?;
        if reply.command_id != CommandId::KeyResponse {
            return Err(Error::IncorrectPacket);
        }
        Ok(reply)
    }

    fn verify_key_response(packet: &TransportPacket, pin: &PairingPin) -> KeyVerifyResult {
        if packet.payload.len() != KEY_RESPONSE_PAYLOAD_LEN {
            return KeyVerifyResult::Corrupt;
        }
        let mut digits = [0_u8; PIN_LEN];
        digits.copy_from_slice(pin.digits());
        let weak_key = weak_key_from_pin(&digits);
        let weak_cipher = Cipher::new(&weak_key);
        if !packet.verify_mac(&weak_cipher) {
            return KeyVerifyResult::WrongPin;
        }

        let mut client_pump_key = [0_u8; 16];
        client_pump_key.copy_from_slice(&packet.payload[0..16]);
        weak_cipher.decrypt_block(&mut client_pump_key);

        let mut pump_client_key = [0_u8; 16];
        pump_client_key.copy_from_slice(&packet.payload[16..32]);
        weak_cipher.decrypt_block(&mut pump_client_key);

        KeyVerifyResult::Ok(PairingData {
            client_pump_key,
            pump_client_key,
            key_response_address: swap_nibbles(packet.address),
        })
    }

    /// Sends `REQUEST_ID` with the client's software version and
    /// Bluetooth friendly name, and waits for `ID_RESPONSE`.
    async fn request_id(
        &self,
        raw: &mut mpsc::UnboundedReceiver<TransportPacket>,
        client_version: u32,
        device_name: &str,
    ) -> Result<()> {
        let mut name = [0_u8; FRIENDLY_NAME_LEN];
        let name_bytes = device_name.as_bytes();
        let take = name_bytes.len().min(FRIENDLY_NAME_LEN);
        name[..take].copy_from_slice(&name_bytes[..take]);

        let mut p = Packer::with_capacity(4 + FRIENDLY_NAME_LEN);
        p.u32(client_version).put(&name);
        self.session
            .send_transport(CommandId::RequestId, p.into_vec())
            .await?;
        let reply = self.recv_raw(raw).await?;
        if reply.command_id != CommandId::IdResponse {
            return Err(Error::IncorrectPacket);
        }
        Ok(())
    }

    async fn request_regular_connection(
        &self,
        raw: &mut mpsc::UnboundedReceiver<TransportPacket>,
    ) -> Result<()> {
        self.session
            .send_transport(CommandId::RequestRegularConnection, Vec::new())
            .await?;
        let reply = self.recv_raw(raw).await?;
        if reply.command_id != CommandId::RegularConnectionRequestAccepted {
            return Err(Error::IncorrectPacket);
        }
        Ok(())
    }

    async fn ctrl_connect(&self, control: &mut mpsc::UnboundedReceiver<Inbound>) -> Result<()> {
        self.session
            .send_app(AppPacket::new(AppCommand::CtrlConnect, Vec::new()))
            .await?;
        self.await_response(control, AppCommand::CtrlConnectResponse).await
    }

    async fn ctrl_get_service_version(
        &self,
        control: &mut mpsc::UnboundedReceiver<Inbound>,
        target: ServiceId,
    ) -> Result<()> {
        self.session
            .send_app(AppPacket::new(
                AppCommand::CtrlGetServiceVersion,
                vec![target as u8],
            ))
            .await?;
        self.await_response(control, AppCommand::CtrlGetServiceVersionResponse).await
    }

    async fn bind(&self, control: &mut mpsc::UnboundedReceiver<Inbound>) -> Result<()> {
        self.session
            .send_app(AppPacket::new(AppCommand::CtrlBind, Vec::new()))
            .await?;
        self.await_response(control, AppCommand::CtrlBindResponse).await
    }

    async fn ctrl_disconnect(&self) -> Result<()> {
        self.session
            .send_app(AppPacket::new(AppCommand::CtrlDisconnect, Vec::new()))
            .await
    }

    async fn await_response(
        &self,
        control: &mut mpsc::UnboundedReceiver<Inbound>,
        expected: AppCommand,
    ) -> Result<()> {
        loop {
            let inbound = control.recv().await.ok_or_else(|| {
                self.session.session_error().unwrap_or_else(|| {
                    Error::SessionClosed("control channel closed during pairing".into())
                })
            })?;
            if inbound.packet.command == expected {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_pin_yields_wrong_pin_result() {
        let cipher = Cipher::new(&weak_key_from_pin(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 0]));
        let mut packet = TransportPacket::new(
            CommandId::KeyResponse,
            PAIRING_ADDRESS,
            Nonce::one(),
            vec![0xAB; KEY_RESPONSE_PAYLOAD_LEN],
        );
        packet.authenticate(&cipher);

        let wrong_pin = PairingPin::parse("0000000000").unwrap();
        assert!(matches!(
            PairingFlow::verify_key_response(&packet, &wrong_pin),
            KeyVerifyResult::WrongPin
        ));
    }

    #[test]
    fn malformed_payload_is_corrupt_not_wrong_pin() {
        let packet = TransportPacket::new(
            CommandId::KeyResponse,
            PAIRING_ADDRESS,
            Nonce::one(),
            vec![0; 4],
        );
        let pin = PairingPin::parse("1234567890").unwrap();
        assert!(matches!(
            PairingFlow::verify_key_response(&packet, &pin),
            KeyVerifyResult::Corrupt
        ));
    }

    #[test]
    fn correct_pin_recovers_the_original_keys() {
        let pin = PairingPin::parse("1357924680").unwrap();
        let mut digits = [0_u8; PIN_LEN];
        digits.copy_from_slice(pin.digits());
        let weak_cipher = Cipher::new(&weak_key_from_pin(&digits));

        let client_pump_key = [0x11_u8; 16];
        let pump_client_key = [0x22_u8; 16];
        let mut payload = Vec::with_capacity(32);
        let mut a = client_pump_key;
        weak_cipher.encrypt_block(&mut a);
        payload.extend_from_slice(&a);
        let mut b = pump_client_key;
        weak_cipher.encrypt_block(&mut b);
        payload.extend_from_slice(&b);

        let mut packet =
            TransportPacket::new(CommandId::KeyResponse, PAIRING_ADDRESS, Nonce::one(), payload);
        packet.authenticate(&weak_cipher);

        match PairingFlow::verify_key_response(&packet, &pin) {
            KeyVerifyResult::Ok(data) => {
                assert_eq!(data.client_pump_key, client_pump_key);
                assert_eq!(data.pump_client_key, pump_client_key);
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }
}
