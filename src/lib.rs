//! Driver for the Accu-Chek Spirit Combo insulin pump: the Combo wire
//! protocol (framing, transport authentication, application-layer
//! command multiplexing), the pairing and connect state machines, and
//! the RT-mode menu navigation engine built on top of them.
//!
//! Talks to the pump over an RFCOMM channel supplied by the caller
//! through [`bluetooth::BluetoothTransport`]; this crate has no
//! platform-specific Bluetooth code of its own.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod address;
pub mod app;
pub mod bluetooth;
pub mod command_mode;
pub mod connect;
pub mod error;
pub mod frame;
pub mod menu;
pub mod ops;
pub mod pairing;
pub mod pdu;
pub mod rt_button;
pub mod screen;
pub mod session;
pub mod store;
pub mod transport;

pub use error::{Error, Result};

/// Returns a string representation of the specified type, for log
/// fields that want a type name without pulling in the unstable
/// `std::any::type_name` const story.
macro_rules! name_of {
    ($t:ty) => {{
        type _T = $t; // keeps $t refactor-friendly under rust-analyzer
        stringify!($t)
    }};
}
pub(crate) use name_of;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_of_expands_to_the_type_name() {
        assert_eq!(name_of!(Error), "Error");
    }
}
