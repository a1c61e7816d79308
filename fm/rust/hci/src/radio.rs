//! Per-session radio state

use fm_packet::params::{
    AgcRequest, BlendTable, ChDetThreshold, CommandParams, DefaultData, MuteMode, RdsGroupMask,
    RecvConf, RivaPoke, SearchRdsStation, SearchStation, SearchStationList, SsbiPeek, SsbiPoke,
    StationDbgParam, StereoMode, TransConf, TuneStatus,
};
use fm_packet::OpCode;
use log::debug;
use num_derive::FromPrimitive;

/// Where the radio is in its power cycle
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FmMode {
    Off = 0,
    Recv = 1,
    Trans = 2,
    Reset = 3,
    Calib = 4,
    TurningOff = 5,
    RecvTurningOn = 6,
    TransTurningOn = 7,
}

impl Default for FmMode {
    fn default() -> Self {
        FmMode::Off
    }
}

/// Search algorithms selectable through the search mode control
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    Seek = 0,
    Scan = 1,
    ScanForStrong = 2,
    ScanForWeak = 3,
    RdsSeekPty = 4,
    RdsScanPty = 5,
    RdsSeekPi = 6,
    RdsAfJump = 7,
}

/// Bits of the search mode control that select the algorithm
pub const SRCH_MODE: u8 = 0x07;
/// RDS searches are numbered from zero on the wire
pub const SEARCH_RDS_STNS_MODE_OFFSET: u8 = 4;

/// Search direction as sent to the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchDirection {
    Up = 0,
    Down = 1,
}

/// A piece of configuration that also lives on the controller.
///
/// `requested` is what the host will send next, `applied` what the
/// controller last acknowledged. Only a zero-status response moves `applied`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mirrored<T> {
    applied: T,
    requested: T,
}

impl<T: Clone + PartialEq> Mirrored<T> {
    /// Last value the controller acknowledged
    pub fn applied(&self) -> &T {
        &self.applied
    }

    /// Value the host is working with
    pub fn requested(&self) -> &T {
        &self.requested
    }

    /// Edits the host copy without sending anything
    pub fn requested_mut(&mut self) -> &mut T {
        &mut self.requested
    }

    /// Edits the host copy and returns it, ready to be sent
    pub fn stage<F: FnOnce(&mut T)>(&mut self, edit: F) -> T {
        edit(&mut self.requested);
        self.requested.clone()
    }

    /// The controller acknowledged `value`
    pub fn commit(&mut self, value: T) {
        self.applied = value;
    }

    /// The controller refused `value`; undo it unless the host moved on since
    pub fn rollback(&mut self, value: &T) {
        if self.requested == *value {
            self.requested = self.applied.clone();
        }
    }

    /// The controller reported its current value
    pub fn sync(&mut self, value: T) {
        self.applied = value.clone();
        self.requested = value;
    }
}

/// A configuration write waiting for its command-complete
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Staged {
    RecvConf(RecvConf),
    TransConf(TransConf),
    Mute(MuteMode),
    Stereo(StereoMode),
    RdsGroup(RdsGroupMask),
    RdsGroupProcess(u32),
    EventMask(u8),
    Antenna(u8),
    ChDet(ChDetThreshold),
    Blend(BlendTable),
}

impl Staged {
    /// Command that carries this write
    pub fn opcode(&self) -> OpCode {
        match self {
            Staged::RecvConf(_) => OpCode::SetRecvConf,
            Staged::TransConf(_) => OpCode::SetTransConf,
            Staged::Mute(_) => OpCode::SetMuteMode,
            Staged::Stereo(_) => OpCode::SetStereoMode,
            Staged::RdsGroup(_) => OpCode::RdsGroup,
            Staged::RdsGroupProcess(_) => OpCode::RdsGroupProcess,
            Staged::EventMask(_) => OpCode::SetEventMask,
            Staged::Antenna(_) => OpCode::SetAntenna,
            Staged::ChDet(_) => OpCode::SetChDetThreshold,
            Staged::Blend(_) => OpCode::SetBlendTable,
        }
    }

    /// Parameter block of the command
    pub fn params(&self) -> Vec<u8> {
        match self {
            Staged::RecvConf(p) => p.to_bytes(),
            Staged::TransConf(p) => p.to_bytes(),
            Staged::Mute(p) => p.to_bytes(),
            Staged::Stereo(p) => p.to_bytes(),
            Staged::RdsGroup(p) => p.to_bytes(),
            Staged::RdsGroupProcess(p) => p.to_bytes(),
            Staged::EventMask(p) => p.to_bytes(),
            Staged::Antenna(p) => p.to_bytes(),
            Staged::ChDet(p) => p.to_bytes(),
            Staged::Blend(p) => p.to_bytes(),
        }
    }
}

/// Everything the host knows about the radio
#[derive(Debug, Default)]
pub struct RadioState {
    pub mode: FmMode,
    pub recv_conf: Mirrored<RecvConf>,
    pub trans_conf: Mirrored<TransConf>,
    pub mute_mode: Mirrored<MuteMode>,
    pub stereo_mode: Mirrored<StereoMode>,
    pub rds_grp: Mirrored<RdsGroupMask>,
    pub rds_grp_proc: Mirrored<u32>,
    pub event_mask: Mirrored<u8>,
    pub antenna: Mirrored<u8>,
    pub ch_det: Mirrored<ChDetThreshold>,
    pub blend_tbl: Mirrored<BlendTable>,
    /// Groups requested so far, ORed across calls
    pub grp_mask: u32,
    pub def_data: DefaultData,
    pub st_dbg_param: StationDbgParam,
    /// Last tune status, from the tune event or a station parameter read
    pub fm_st_rsp: TuneStatus,
    pub srch_st: SearchStation,
    pub srch_rds: SearchRdsStation,
    pub srch_st_list: SearchStationList,
    pub search_mode: u8,
    pub scan_time: u8,
    pub search_on: bool,
    pub region: i32,
    pub af_jump: bool,
    pub low_power: bool,
    pub riva: RivaPoke,
    pub ssbi: SsbiPoke,
    pub ssbi_peek: SsbiPeek,
    pub agc: AgcRequest,
    pub slimbus: bool,
}

impl RadioState {
    /// Settles a staged write once its status is known
    pub fn apply(&mut self, staged: Staged, ok: bool) {
        debug!("{} {:?}", if ok { "commit" } else { "rollback" }, staged);
        match staged {
            Staged::RecvConf(v) => settle(&mut self.recv_conf, v, ok),
            Staged::TransConf(v) => settle(&mut self.trans_conf, v, ok),
            Staged::Mute(v) => settle(&mut self.mute_mode, v, ok),
            Staged::Stereo(v) => settle(&mut self.stereo_mode, v, ok),
            Staged::RdsGroup(v) => settle(&mut self.rds_grp, v, ok),
            Staged::RdsGroupProcess(v) => settle(&mut self.rds_grp_proc, v, ok),
            Staged::EventMask(v) => settle(&mut self.event_mask, v, ok),
            Staged::Antenna(v) => settle(&mut self.antenna, v, ok),
            Staged::ChDet(v) => settle(&mut self.ch_det, v, ok),
            Staged::Blend(v) => settle(&mut self.blend_tbl, v, ok),
        }
    }
}

fn settle<T: Clone + PartialEq>(field: &mut Mirrored<T>, value: T, ok: bool) {
    if ok {
        field.commit(value);
    } else {
        field.rollback(&value);
    }
}
