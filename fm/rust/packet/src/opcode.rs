use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// Receiver control command group
pub const OGF_RECV_CTRL: u16 = 0x13;
/// Transmitter control command group
pub const OGF_TRANS_CTRL: u16 = 0x14;
/// Common control command group
pub const OGF_COMMON_CTRL: u16 = 0x15;
/// Status parameter command group
pub const OGF_STATUS_PARAMETERS: u16 = 0x16;
/// Test command group
pub const OGF_TEST: u16 = 0x17;
/// Diagnostic command group
pub const OGF_DIAGNOSTIC: u16 = 0x3F;

const OCF_MASK: u16 = 0x03FF;
const OGF_SHIFT: u16 = 10;

/// Packs a 6 bit group and a 10 bit command into an opcode
pub const fn opcode_pack(ogf: u16, ocf: u16) -> u16 {
    ((ogf & 0x3F) << OGF_SHIFT) | (ocf & OCF_MASK)
}

/// Command group of an opcode
pub const fn opcode_ogf(opcode: u16) -> u16 {
    opcode >> OGF_SHIFT
}

/// Command field of an opcode
pub const fn opcode_ocf(opcode: u16) -> u16 {
    opcode & OCF_MASK
}

const fn recv(ocf: u16) -> u16 {
    opcode_pack(OGF_RECV_CTRL, ocf)
}

const fn trans(ocf: u16) -> u16 {
    opcode_pack(OGF_TRANS_CTRL, ocf)
}

const fn common(ocf: u16) -> u16 {
    opcode_pack(OGF_COMMON_CTRL, ocf)
}

const fn status(ocf: u16) -> u16 {
    opcode_pack(OGF_STATUS_PARAMETERS, ocf)
}

const fn diag(ocf: u16) -> u16 {
    opcode_pack(OGF_DIAGNOSTIC, ocf)
}

/// Every command the FM controller understands
#[derive(FromPrimitive, Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    EnableRecv = recv(0x01),
    DisableRecv = recv(0x02),
    GetRecvConf = recv(0x03),
    SetRecvConf = recv(0x04),
    SetMuteMode = recv(0x05),
    SetStereoMode = recv(0x06),
    SetAntenna = recv(0x07),
    SetSignalThreshold = recv(0x08),
    GetSignalThreshold = recv(0x09),
    GetStationParam = recv(0x0A),
    GetProgramService = recv(0x0B),
    GetRadioText = recv(0x0C),
    GetAfList = recv(0x0D),
    SearchStations = recv(0x0E),
    SearchRdsStations = recv(0x0F),
    SearchStationList = recv(0x10),
    CancelSearch = recv(0x11),
    RdsGroup = recv(0x12),
    RdsGroupProcess = recv(0x13),
    EnableWanAvoidance = recv(0x14),
    EnableNotch = recv(0x15),
    SetEventMask = recv(0x16),
    SetChDetThreshold = recv(0x17),
    GetChDetThreshold = recv(0x18),
    SetBlendTable = recv(0x1B),
    GetBlendTable = recv(0x1C),
    LowPassFilter = recv(0x1F),

    EnableTrans = trans(0x01),
    DisableTrans = trans(0x02),
    SetTransConf = trans(0x04),

    TuneStation = common(0x01),
    DefaultDataRead = common(0x02),
    DefaultDataWrite = common(0x03),
    Reset = common(0x04),
    GetFeatureList = common(0x05),
    DoCalibration = common(0x06),
    SetCalibration = common(0x07),
    SetSpurTable = common(0x08),
    GetSpurTable = common(0x09),

    ReadGroupCounters = status(0x01),
    ReadGroupCountersExt = status(0x02),

    PeekData = diag(0x02),
    PokeData = diag(0x03),
    SsbiPeek = diag(0x04),
    SsbiPoke = diag(0x05),
    StationDbgParam = diag(0x07),
    ToneGenerator = diag(0x08),
    SetGetResetAgc = diag(0x0D),
    EnableSlimbus = diag(0x0E),
}

impl OpCode {
    /// Looks up a wire opcode, None when the controller sent something unknown
    pub fn from_wire(opcode: u16) -> Option<OpCode> {
        OpCode::from_u16(opcode)
    }

    /// Command group of this opcode
    pub fn ogf(self) -> u16 {
        opcode_ogf(self as u16)
    }

    /// Command field of this opcode
    pub fn ocf(self) -> u16 {
        opcode_ocf(self as u16)
    }
}

impl From<OpCode> for u16 {
    fn from(op: OpCode) -> u16 {
        op as u16
    }
}
