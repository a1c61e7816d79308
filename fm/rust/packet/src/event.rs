use crate::error::{ensure_len, PacketError, Result};
use crate::HciPacketHeaderSize;
use bytes::Bytes;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

/// Event codes reported by the FM controller
#[derive(FromPrimitive, ToPrimitive, Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum EventCode {
    TuneStatus = 0x01,
    RdsLockStatus = 0x02,
    StereoStatus = 0x03,
    ServiceAvailable = 0x04,
    SearchProgress = 0x05,
    SearchRdsProgress = 0x06,
    SearchListProgress = 0x07,
    RdsRxData = 0x08,
    ProgramService = 0x09,
    RadioText = 0x0A,
    AfList = 0x0B,
    TxRdsGroupAvailable = 0x0C,
    TxRdsGroupComplete = 0x0D,
    TxRdsContinuousComplete = 0x0E,
    CommandComplete = 0x0F,
    CommandStatus = 0x10,
    TuneComplete = 0x11,
    SearchComplete = 0x12,
    SearchRdsComplete = 0x13,
    SearchListComplete = 0x14,
    ExtCountryCode = 0x17,
    RadioTextPlusId = 0x18,
    RadioTextPlusTag = 0x19,
    HwError = 0x1A,
    DriverRdsEvent = 0x1B,
    ERadioText = 0x1C,
}

impl EventCode {
    /// Looks up a wire event code
    pub fn from_wire(code: u8) -> Option<EventCode> {
        EventCode::from_u8(code)
    }
}

/// An inbound event, header checked against the buffer it arrived in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventPacket {
    raw: Bytes,
}

impl EventPacket {
    /// Validates the `{evt_code, evt_len}` header. `evt_len` is untrusted:
    /// it must fit in what was actually received. Trailing bytes are cut off.
    pub fn parse(raw: Bytes) -> Result<EventPacket> {
        let header = HciPacketHeaderSize::Event as usize;
        ensure_len(&raw, header)?;
        let needed = header + raw[1] as usize;
        ensure_len(&raw, needed)?;
        Ok(EventPacket { raw: raw.slice(..needed) })
    }

    /// Raw event code
    pub fn code_raw(&self) -> u8 {
        self.raw[0]
    }

    /// Decoded event code, None for codes this host does not know
    pub fn code(&self) -> Option<EventCode> {
        EventCode::from_wire(self.code_raw())
    }

    /// Parameter block
    pub fn params(&self) -> &[u8] {
        &self.raw[HciPacketHeaderSize::Event as usize..]
    }

    /// Parameter block as shared bytes
    pub fn params_bytes(&self) -> Bytes {
        self.raw.slice(HciPacketHeaderSize::Event as usize..)
    }

    /// Whole packet
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }
}

/// Command-complete view: `[num_cmds, opcode_lo, opcode_hi, status, rsp..]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandComplete {
    /// Number of command packets the controller will accept
    pub num_cmds: u8,
    /// Opcode of the completed command
    pub opcode: u16,
    /// Response payload, starting with the status byte
    pub payload: Bytes,
}

impl CommandComplete {
    /// Parses the parameters of a command-complete event
    pub fn parse(params: &Bytes) -> Result<CommandComplete> {
        // the status byte at offset 3 is part of every response
        ensure_len(params, 4)?;
        Ok(CommandComplete {
            num_cmds: params[0],
            opcode: u16::from_le_bytes([params[1], params[2]]),
            payload: params.slice(3..),
        })
    }

    /// Status byte reported by the controller
    pub fn status(&self) -> u8 {
        self.payload[0]
    }
}

/// Command-status view: `[status, num_cmds, opcode_lo, opcode_hi]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandStatus {
    /// Acceptance status
    pub status: u8,
    /// Number of command packets the controller will accept
    pub num_cmds: u8,
    /// Opcode the status refers to
    pub opcode: u16,
}

impl CommandStatus {
    /// Parses the parameters of a command-status event
    pub fn parse(params: &[u8]) -> Result<CommandStatus> {
        ensure_len(params, 4)?;
        Ok(CommandStatus {
            status: params[0],
            num_cmds: params[1],
            opcode: u16::from_le_bytes([params[2], params[3]]),
        })
    }
}

impl From<CommandStatus> for Bytes {
    fn from(st: CommandStatus) -> Bytes {
        let [lo, hi] = st.opcode.to_le_bytes();
        Bytes::from(vec![EventCode::CommandStatus as u8, 4, st.status, st.num_cmds, lo, hi])
    }
}

/// Frames an event; only meant for simulators and tests
pub fn build_event(code: u8, params: &[u8]) -> Result<Bytes> {
    if params.len() > u8::MAX as usize {
        return Err(PacketError::ParamsTooLong(params.len()));
    }
    let mut raw = Vec::with_capacity(params.len() + 2);
    raw.push(code);
    raw.push(params.len() as u8);
    raw.extend_from_slice(params);
    Ok(Bytes::from(raw))
}

/// Frames a command-complete event for `opcode` carrying `status` then `rsp`
pub fn build_command_complete(opcode: u16, status: u8, rsp: &[u8]) -> Result<Bytes> {
    let [lo, hi] = opcode.to_le_bytes();
    let mut params = vec![1, lo, hi, status];
    params.extend_from_slice(rsp);
    build_event(EventCode::CommandComplete as u8, &params)
}
