//! RT-mode button codes and the display payload codec (§4.4, §6).

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::pdu::{Packer, Unpacker};

bitflags! {
    /// Button codes carried by `RT_BUTTON_STATUS`. `BACK` is the
    /// combination the pump expects to navigate up one menu level.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct RtButton: u8 {
        const NO_BUTTON = 0x00;
        const MENU = 0x03;
        const CHECK = 0x0C;
        const UP = 0x30;
        const DOWN = 0xC0;
        const BACK = Self::MENU.bits() | Self::UP.bits();
    }
}

/// Outgoing button status report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RtButtonStatus {
    pub rt_sequence: u16,
    pub button: RtButton,
    /// Whether the button code changed since the previously sent status,
    /// not whether the button is currently held. The first status of a
    /// press and the final `NO_BUTTON` release both set this; repeated
    /// statuses sent while holding a long press do not.
    pub changed: bool,
}

/// Flag byte meaning "button code changed since the last status".
const STATUS_CHANGED: u8 = 0xB7;
/// Flag byte meaning "unchanged since the last status".
const STATUS_UNCHANGED: u8 = 0x48;

impl RtButtonStatus {
    /// Serializes the payload carried by an `RT_BUTTON_STATUS` packet.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut p = Packer::with_capacity(4);
        p.u16(self.rt_sequence)
            .u8(self.button.bits())
            .u8(if self.changed {
                STATUS_CHANGED
            } else {
                STATUS_UNCHANGED
            });
        p.into_vec()
    }

    /// Returns the next sequence number, wrapping at `u16::MAX`.
    #[must_use]
    pub const fn next_sequence(self) -> u16 {
        self.rt_sequence.wrapping_add(1)
    }
}

/// Which of the four 8-row display bands a `RT_DISPLAY` packet carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RowBand {
    Top = 0,
    UpperMiddle = 1,
    LowerMiddle = 2,
    Bottom = 3,
}

impl RowBand {
    fn from_row_id(row_id: u8) -> Result<Self> {
        match row_id {
            0x47 => Ok(Self::Top),
            0x48 => Ok(Self::UpperMiddle),
            0xB7 => Ok(Self::LowerMiddle),
            0xB8 => Ok(Self::Bottom),
            _ => Err(Error::InvalidPayload("unrecognized RT_DISPLAY row id")),
        }
    }
}

/// Number of display columns.
pub const DISPLAY_COLS: usize = 96;
/// Number of display rows.
pub const DISPLAY_ROWS: usize = 32;
/// Rows carried by each `RT_DISPLAY` packet.
const ROWS_PER_BAND: usize = 8;
/// Minimum payload length: sequence(2) + reason(1) + index(1) + row_id(1) +
/// 96 column bytes.
const MIN_PAYLOAD_LEN: usize = 101;

/// A decoded `RT_DISPLAY` packet: one 8-row band of the 96x32 display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtDisplay {
    pub rt_sequence: u16,
    pub reason: u8,
    pub index: u8,
    pub row_band: RowBand,
    pub columns: [u8; DISPLAY_COLS],
}

impl RtDisplay {
    /// Decodes an `RT_DISPLAY` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the payload is shorter than
    /// [`MIN_PAYLOAD_LEN`] or carries an unrecognized row id.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_PAYLOAD_LEN {
            return Err(Error::InvalidPayload("RT_DISPLAY payload too short"));
        }
        let mut u = Unpacker::new(bytes);
        let rt_sequence = u.u16();
        let reason = u.u8();
        let index = u.u8();
        let row_id = u.u8();
        let row_band = RowBand::from_row_id(row_id)?;
        let mut columns = [0_u8; DISPLAY_COLS];
        columns.copy_from_slice(u.bytes(DISPLAY_COLS));
        Ok(Self {
            rt_sequence,
            reason,
            index,
            row_band,
            columns,
        })
    }
}

/// The assembled 96x32 monochrome display, built from four `RT_DISPLAY`
/// bands. Pixels are addressed `[row][col]`, `row` 0 at the top.
#[derive(Clone)]
pub struct DisplayFrame {
    pixels: [[bool; DISPLAY_COLS]; DISPLAY_ROWS],
}

impl Default for DisplayFrame {
    fn default() -> Self {
        Self {
            pixels: [[false; DISPLAY_COLS]; DISPLAY_ROWS],
        }
    }
}

impl DisplayFrame {
    /// Creates a blank frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a decoded band to this frame, overwriting its 8 rows.
    ///
    /// Column bytes are stored right-to-left (column 0 is the low bit of
    /// the last byte); within a byte, bit 0 is the band's top row.
    pub fn apply_band(&mut self, display: &RtDisplay) {
        let row_base = display.row_band as usize * ROWS_PER_BAND;
        for (col, byte) in display.columns.iter().rev().enumerate() {
            for bit in 0..ROWS_PER_BAND {
                self.pixels[row_base + bit][col] = byte & (1 << bit) != 0;
            }
        }
    }

    /// Returns whether the pixel at `(row, col)` is lit.
    #[must_use]
    pub fn pixel(&self, row: usize, col: usize) -> bool {
        self.pixels[row][col]
    }

    /// Returns whether every pixel is unlit.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|row| row.iter().all(|&p| !p))
    }
}

impl std::fmt::Debug for DisplayFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "DisplayFrame {{")?;
        for row in &self.pixels {
            let line: String = row.iter().map(|&p| if p { '#' } else { ' ' }).collect();
            writeln!(f, "  {line}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_status_round_trips_through_fields() {
        let status = RtButtonStatus {
            rt_sequence: 7,
            button: RtButton::CHECK,
            changed: true,
        };
        let bytes = status.encode();
        assert_eq!(bytes[2], RtButton::CHECK.bits());
        assert_eq!(bytes[3], STATUS_CHANGED);
        assert_eq!(status.next_sequence(), 8);
    }

    #[test]
    fn back_is_menu_combined_with_up() {
        assert_eq!(RtButton::BACK, RtButton::MENU | RtButton::UP);
    }

    #[test]
    fn rt_display_rejects_short_payload() {
        assert!(RtDisplay::decode(&[0; 10]).is_err());
    }

    #[test]
    fn rt_display_rejects_unknown_row_id() {
        let mut bytes = vec![0_u8; MIN_PAYLOAD_LEN];
        bytes[4] = 0xFF;
        assert!(RtDisplay::decode(&bytes).is_err());
    }

    #[test]
    fn display_frame_assembles_bit_orientation() {
        let mut bytes = vec![0_u8; MIN_PAYLOAD_LEN];
        bytes[4] = 0x47; // top band
        // Last column byte (index 95 in the payload's column array) maps
        // to display column 0, per the right-to-left convention.
        bytes[bytes.len() - 1] = 0b0000_0001; // row 0 lit
        let display = RtDisplay::decode(&bytes).unwrap();
        let mut frame = DisplayFrame::new();
        frame.apply_band(&display);
        assert!(frame.pixel(0, 0));
        assert!(!frame.pixel(1, 0));
        assert!(!frame.pixel(0, 1));
    }
}
