//! FM HCI packet representation
//!
//! Commands travel host to controller as `{opcode: u16 LE, len: u8, params}`,
//! events come back as `{evt_code: u8, evt_len: u8, params}`.

/// Command packet framing
pub mod command;
/// Codec errors
pub mod error;
/// Event packet parsing and event codes
pub mod event;
/// Opcode namespace
pub mod opcode;
/// Typed command and response parameter blocks
pub mod params;

pub use command::CommandPacket;
pub use error::PacketError;
pub use event::{CommandComplete, CommandStatus, EventCode, EventPacket};
pub use opcode::{opcode_ocf, opcode_ogf, opcode_pack, OpCode};

use num_derive::{FromPrimitive, ToPrimitive};

/// Packet types, as carried in the one-byte H4 style prefix
#[derive(FromPrimitive, ToPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HciPacketType {
    /// FM HCI command packet
    Command = 0x01,
    /// FM HCI event packet
    Event = 0x04,
}

/// Header size (in bytes) for each packet type
#[derive(FromPrimitive, ToPrimitive, Clone, Copy, Debug)]
pub enum HciPacketHeaderSize {
    /// Event header: code, length
    Event = 2,
    /// Command header: opcode (2), length
    Command = 3,
}
