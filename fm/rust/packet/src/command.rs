use crate::error::{PacketError, Result};
use crate::opcode::{opcode_ocf, opcode_ogf};
use crate::HciPacketHeaderSize;
use bytes::{BufMut, Bytes};
use std::fmt;

/// Largest parameter block a command can carry
pub const MAX_COMMAND_PARAMS: usize = u8::MAX as usize;

/// A framed FM HCI command: `{opcode: u16 LE, len: u8, params}`
#[derive(Clone, PartialEq, Eq)]
pub struct CommandPacket {
    raw: Bytes,
}

impl CommandPacket {
    /// Frames `params` behind the opcode and length header.
    /// The buffer is reserved up front so an allocation failure surfaces
    /// as `NoMemory` instead of aborting the process.
    pub fn build(opcode: u16, params: &[u8]) -> Result<CommandPacket> {
        if params.len() > MAX_COMMAND_PARAMS {
            return Err(PacketError::ParamsTooLong(params.len()));
        }
        let total = HciPacketHeaderSize::Command as usize + params.len();
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(total).map_err(|_| PacketError::NoMemory(total))?;
        buf.put_u16_le(opcode);
        buf.put_u8(params.len() as u8);
        buf.put_slice(params);
        Ok(CommandPacket { raw: Bytes::from(buf) })
    }

    /// Wraps an already framed command, checking the header against the length
    pub fn parse(raw: Bytes) -> Result<CommandPacket> {
        crate::error::ensure_len(&raw, HciPacketHeaderSize::Command as usize)?;
        let len = raw[2] as usize;
        let needed = HciPacketHeaderSize::Command as usize + len;
        if raw.len() != needed {
            return Err(PacketError::Truncated { needed, actual: raw.len() });
        }
        Ok(CommandPacket { raw })
    }

    /// Opcode from the header
    pub fn opcode(&self) -> u16 {
        u16::from_le_bytes([self.raw[0], self.raw[1]])
    }

    /// Length field from the header
    pub fn param_len(&self) -> u8 {
        self.raw[2]
    }

    /// Parameter block following the header
    pub fn params(&self) -> &[u8] {
        &self.raw[HciPacketHeaderSize::Command as usize..]
    }

    /// The whole packet as it goes on the wire
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Consumes the packet, yielding the wire bytes
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// Total length including the header
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// A command is never empty, the header is always present
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl fmt::Debug for CommandPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        f.debug_struct("CommandPacket")
            .field("ogf", &format!("{:#04x}", opcode_ogf(op)))
            .field("ocf", &format!("{:#05x}", opcode_ocf(op)))
            .field("len", &self.param_len())
            .field("params", &self.params())
            .finish()
    }
}
