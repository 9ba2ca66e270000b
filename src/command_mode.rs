//! Command-mode request/response payload codecs: date/time, pump status,
//! error/warning status, history deltas, and bolus delivery.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::pdu::{Packer, Unpacker};

/// Decoded `CMD_READ_DATE_TIME_RESPONSE` payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PumpDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl PumpDateTime {
    /// Decodes a `CMD_READ_DATE_TIME_RESPONSE` payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 7 {
            return Err(Error::InvalidPayload("date/time payload too short"));
        }
        let mut u = Unpacker::new(bytes);
        Ok(Self {
            year: u.u16(),
            month: u.u8(),
            day: u.u8(),
            hour: u.u8(),
            minute: u.u8(),
            second: u.u8(),
        })
    }
}

bitflags! {
    /// Pump operating status bits (`CMD_READ_STATUS_RESPONSE`).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PumpStatusFlags: u8 {
        const RUNNING = 0x01;
        const STOPPED = 0x02;
        const TBR_ACTIVE = 0x04;
        const BOLUS_ACTIVE = 0x08;
        const BATTERY_LOW = 0x10;
        const RESERVOIR_LOW = 0x20;
    }
}

/// Decoded `CMD_READ_STATUS_RESPONSE` payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PumpStatus {
    pub flags: PumpStatusFlags,
    /// Active TBR percentage, valid only while `TBR_ACTIVE` is set.
    pub tbr_percent: u16,
    /// Remaining TBR minutes, valid only while `TBR_ACTIVE` is set.
    pub tbr_remaining_minutes: u16,
}

impl PumpStatus {
    /// Decodes a `CMD_READ_STATUS_RESPONSE` payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::InvalidPayload("status payload too short"));
        }
        let mut u = Unpacker::new(bytes);
        Ok(Self {
            flags: PumpStatusFlags::from_bits_truncate(u.u8()),
            tbr_percent: u.u16(),
            tbr_remaining_minutes: u.u16(),
        })
    }
}

bitflags! {
    /// Error bits (`CMD_READ_ERROR_WARNING_STATUS_RESPONSE`).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PumpErrors: u16 {
        const OCCLUSION = 0x0001;
        const BATTERY_EMPTY = 0x0002;
        const RESERVOIR_EMPTY = 0x0004;
        const MOTOR_FAULT = 0x0008;
    }
}

bitflags! {
    /// Warning bits (`CMD_READ_ERROR_WARNING_STATUS_RESPONSE`).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PumpWarnings: u16 {
        const BATTERY_LOW = 0x0001;
        const RESERVOIR_LOW = 0x0002;
        const BOLUS_CANCELLED = 0x0004;
    }
}

/// Decoded `CMD_READ_ERROR_WARNING_STATUS_RESPONSE` payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorWarningStatus {
    pub errors: PumpErrors,
    pub warnings: PumpWarnings,
}

impl ErrorWarningStatus {
    /// Decodes a `CMD_READ_ERROR_WARNING_STATUS_RESPONSE` payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::InvalidPayload("error/warning payload too short"));
        }
        let mut u = Unpacker::new(bytes);
        Ok(Self {
            errors: PumpErrors::from_bits_truncate(u.u16()),
            warnings: PumpWarnings::from_bits_truncate(u.u16()),
        })
    }
}

/// One entry in a `CMD_HISTORY_DELTA_RESPONSE` record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HistoryEntry {
    pub event_id: u16,
    pub timestamp_minutes: u32,
    pub data: u32,
}

const HISTORY_ENTRY_LEN: usize = 10;

/// Decoded `CMD_HISTORY_DELTA_RESPONSE` payload: a count-prefixed array of
/// fixed-size history entries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HistoryDelta {
    pub entries: Vec<HistoryEntry>,
}

impl HistoryDelta {
    /// Decodes a `CMD_HISTORY_DELTA_RESPONSE` payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidPayload("history delta payload too short"));
        }
        let mut u = Unpacker::new(bytes);
        let count = usize::from(u.u16());
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(HistoryEntry {
                event_id: u.u16(),
                timestamp_minutes: u.u32(),
                data: u.u32(),
            });
        }
        if !u.ok() {
            return Err(Error::InvalidPayload("history delta entry count exceeds payload"));
        }
        let _ = HISTORY_ENTRY_LEN;
        Ok(Self { entries })
    }
}

/// Terminal or in-progress state of a bolus delivery, decoded from
/// `CMD_BOLUS_STATUS_RESPONSE`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BolusState {
    Active,
    Delivered,
    CancelledByUser,
    AbortedDueToError,
}

impl BolusState {
    const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Active),
            1 => Some(Self::Delivered),
            2 => Some(Self::CancelledByUser),
            3 => Some(Self::AbortedDueToError),
            _ => None,
        }
    }

    /// Returns whether this state means delivery has stopped, one way or
    /// another.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Decoded `CMD_BOLUS_STATUS_RESPONSE` payload. `remaining` is in 0.1 IU
/// units, matching the wire format; the driver computes the delivered
/// amount itself rather than trusting a separate wire field for it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BolusStatus {
    pub remaining: u32,
    pub state: BolusState,
}

impl BolusStatus {
    /// Decodes a `CMD_BOLUS_STATUS_RESPONSE` payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::InvalidPayload("bolus status payload too short"));
        }
        let mut u = Unpacker::new(bytes);
        let remaining = u.u32();
        let state = BolusState::from_code(u.u8())
            .ok_or(Error::InvalidPayload("unrecognized bolus status code"))?;
        Ok(Self { remaining, state })
    }

    /// Computes the amount delivered so far of a bolus that requested
    /// `requested` 0.1 IU units.
    #[must_use]
    pub const fn delivered(&self, requested: u32) -> u32 {
        requested.saturating_sub(self.remaining)
    }
}

/// Encodes a `CMD_DELIVER_BOLUS` request for `amount` in 0.1 IU units.
#[must_use]
pub fn encode_deliver_bolus(amount: u32) -> Vec<u8> {
    let mut p = Packer::with_capacity(4);
    p.u32(amount);
    p.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_time_decodes_fields_in_order() {
        let bytes = [0xE6, 0x07, 6, 15, 12, 30, 45];
        let dt = PumpDateTime::decode(&bytes).unwrap();
        assert_eq!(dt.year, 2022);
        assert_eq!((dt.month, dt.day), (6, 15));
        assert_eq!((dt.hour, dt.minute, dt.second), (12, 30, 45));
    }

    #[test]
    fn history_delta_rejects_truncated_entries() {
        let mut p = Packer::new();
        p.u16(2).u16(1).u32(100).u32(0xAB); // declares 2 entries, has 1
        assert!(HistoryDelta::decode(&p.into_vec()).is_err());
    }

    #[test]
    fn bolus_status_rejects_unknown_code() {
        let mut p = Packer::new();
        p.u32(50).u8(9);
        assert!(BolusStatus::decode(&p.into_vec()).is_err());
    }

    #[test]
    fn bolus_status_computes_delivered_from_remaining() {
        let mut p = Packer::new();
        p.u32(30).u8(0);
        let status = BolusStatus::decode(&p.into_vec()).unwrap();
        assert_eq!(status.delivered(100), 70);
    }

    #[test]
    fn bolus_status_terminal_states() {
        assert!(!BolusState::Active.is_terminal());
        assert!(BolusState::Delivered.is_terminal());
        assert!(BolusState::CancelledByUser.is_terminal());
    }
}
