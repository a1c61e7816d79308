//! Control interface: the integer get/set surface the FM service drives.
//!
//! Controls are numbered from the private V4L2 control base. Cached values
//! are answered from session state, device-backed ones go to the controller
//! either blocking (`get_fm_ctrl`) or through callbacks (`request_fm_ctrl`).

use crate::error::{FmError, Result};
use crate::events::MAX_SRCH_LIST_STATIONS;
use crate::lock;
use crate::pending::{
    BlendField, ChDetField, DefaultDataField, Expect, ExpectedField, Reply, StationDbgField,
    StationField,
};
use crate::radio::{
    FmMode, SearchDirection, SearchMode, Staged, SEARCH_RDS_STNS_MODE_OFFSET, SRCH_MODE,
};
use crate::session::FmHal;
use fm_packet::params::{
    CommandParams, DefaultDataRead, DefaultDataWrite, RecvConf, SearchRdsStation, SearchStation,
    SearchStationList, AF_ALGO_OFFSET, AF_RMSSI_SAMPLES_OFFSET,
    AF_RMSSI_TH_OFFSET, AF_SINR_GD_CH_TH_OFFSET, AF_SINR_TH_OFFSET, CF0TH12_BYTE1_OFFSET,
    CF0TH12_BYTE2_OFFSET, FM_AFJUMP_CNFG_LEN, FM_AFJUMP_CONFG_MODE, FM_SRCH_CNFG_LEN,
    FM_SRCH_CONFG_MODE, GD_CH_RMSSI_TH_OFFSET, MAX_RIVA_PEEK_RSP_SIZE, RDS_PS0_LEN,
    RDS_PS0_XFR_MODE, RIVA_PEEK_OPCODE, RIVA_POKE_OPCODE, RMSSIFIRSTSTAGE_OFFSET,
    RX_REPEATE_BYTE_OFFSET, SINRFIRSTSTAGE_OFFSET, SRCH_ALGO_TYPE_OFFSET,
};
use fm_packet::OpCode;
use log::{debug, error, info, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use std::ops::RangeInclusive;

/// First id after the private V4L2 control base
pub const FM_CTRL_BASE: i32 = 0x0800_0001;

/// PS-all bit position in the RDS processing word
const RDS_CONFIG_OFFSET: u32 = 3;
/// AF jump bit position in the RDS processing word
const RDS_AF_JUMP_OFFSET: u32 = 4;
const AF_JUMP_ENABLE: u32 = 1 << RDS_AF_JUMP_OFFSET;

/// Event mask bits
const SIG_LEVEL_INTR: u8 = 1 << 0;
const RDS_SYNC_INTR: u8 = 1 << 1;
const AUDIO_CTRL_INTR: u8 = 1 << 2;

/// Processing word restored when leaving low power mode
const RDS_GRP_PROC_ALL: u32 = 0xFF;

/// Every control the engine understands
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    SrchMode = 0x0800_0001,
    ScanDwell = 0x0800_0002,
    SrchOn = 0x0800_0003,
    State = 0x0800_0004,
    RdsGroupMask = 0x0800_0005,
    Region = 0x0800_0006,
    SignalTh = 0x0800_0007,
    SrchPty = 0x0800_0008,
    SrchPi = 0x0800_0009,
    SrchCnt = 0x0800_000A,
    Emphasis = 0x0800_000B,
    RdsStd = 0x0800_000C,
    Spacing = 0x0800_000D,
    RdsOn = 0x0800_000E,
    RdsGroupProc = 0x0800_000F,
    LpMode = 0x0800_0010,
    Antenna = 0x0800_0011,
    RdsdBuf = 0x0800_0012,
    PsAll = 0x0800_0013,
    IoverC = 0x0800_0014,
    IntDet = 0x0800_0015,
    AfJump = 0x0800_0016,
    SoftMute = 0x0800_0017,
    RivaAccsAddr = 0x0800_0018,
    RivaAccsLen = 0x0800_0019,
    RivaPeek = 0x0800_001A,
    RivaPoke = 0x0800_001B,
    SsbiAccsAddr = 0x0800_001C,
    SsbiPeek = 0x0800_001D,
    SsbiPoke = 0x0800_001E,
    RdsGrpCounters = 0x0800_001F,
    SetNotchFilter = 0x0800_0020,
    GetSinr = 0x0800_0021,
    IntfLowThreshold = 0x0800_0022,
    IntfHighThreshold = 0x0800_0023,
    SinrThreshold = 0x0800_0024,
    SinrSamples = 0x0800_0025,
    AfRmssiTh = 0x0800_0026,
    AfRmssiSamples = 0x0800_0027,
    GoodChRmssiTh = 0x0800_0028,
    SrchAlgoType = 0x0800_0029,
    Cf0Th12 = 0x0800_002A,
    SinrFirstStage = 0x0800_002B,
    RmssiFirstStage = 0x0800_002C,
    RxRepeatCount = 0x0800_002D,
    BlendSinrHi = 0x0800_002E,
    BlendRmssiHi = 0x0800_002F,
    RdsGrpCountersExt = 0x0800_0030,
    AgcUcctrl = 0x0800_0031,
    AgcGainState = 0x0800_0032,
    EnableLpf = 0x0800_0033,
    Audio = 0x0800_0034,
    AfAlgo = 0x0800_0035,
    AfSinrGdChTh = 0x0800_0036,
    AfSinrTh = 0x0800_0037,
    AudioMute = 0x0800_0038,
    Freq = 0x0800_0039,
    Seek = 0x0800_003A,
    UpperBand = 0x0800_003B,
    LowerBand = 0x0800_003C,
    AudioMode = 0x0800_003D,
    Rmssi = 0x0800_003E,
}

impl Control {
    /// Looks up a raw control id
    pub fn from_id(id: i32) -> Option<Control> {
        Control::from_i32(id)
    }

    fn ch_det_field(self) -> Option<ChDetField> {
        match self {
            Control::SinrThreshold => Some(ChDetField::SinrThreshold),
            Control::SinrSamples => Some(ChDetField::SinrSamples),
            Control::IntfLowThreshold => Some(ChDetField::IntfLow),
            Control::IntfHighThreshold => Some(ChDetField::IntfHigh),
            _ => None,
        }
    }

    fn default_data_field(self) -> Option<DefaultDataField> {
        match self {
            Control::AfRmssiTh => Some(DefaultDataField::AfRmssiTh),
            Control::AfRmssiSamples => Some(DefaultDataField::AfRmssiSamples),
            Control::GoodChRmssiTh => Some(DefaultDataField::GdChRmssiTh),
            Control::SrchAlgoType => Some(DefaultDataField::SearchAlgo),
            Control::SinrFirstStage => Some(DefaultDataField::SinrFirstStage),
            Control::RmssiFirstStage => Some(DefaultDataField::RmssiFirstStage),
            Control::Cf0Th12 => Some(DefaultDataField::Cf0Th12),
            Control::RxRepeatCount => Some(DefaultDataField::RepeatCount),
            Control::AfAlgo => Some(DefaultDataField::AfAlgo),
            Control::AfSinrGdChTh => Some(DefaultDataField::AfSinrGdChTh),
            Control::AfSinrTh => Some(DefaultDataField::AfSinrTh),
            _ => None,
        }
    }

    fn blend_field(self) -> Option<BlendField> {
        match self {
            Control::BlendSinrHi => Some(BlendField::SinrHi),
            Control::BlendRmssiHi => Some(BlendField::RmssiHi),
            _ => None,
        }
    }
}

/// Default-data block holding `field`: (mode, length)
fn default_data_block(field: DefaultDataField) -> (u8, u8) {
    match field {
        DefaultDataField::SearchAlgo
        | DefaultDataField::SinrFirstStage
        | DefaultDataField::RmssiFirstStage
        | DefaultDataField::Cf0Th12 => (FM_SRCH_CONFG_MODE, FM_SRCH_CNFG_LEN),
        DefaultDataField::RepeatCount | DefaultDataField::TunePower => {
            (RDS_PS0_XFR_MODE, RDS_PS0_LEN)
        }
        _ => (FM_AFJUMP_CONFG_MODE, FM_AFJUMP_CNFG_LEN),
    }
}

fn check(ctrl: Control, val: i32, range: RangeInclusive<i32>) -> Result<i32> {
    if range.contains(&val) {
        Ok(val)
    } else {
        error!("{:?}: {} outside {:?}", ctrl, val, range);
        Err(FmError::InvalidArgument)
    }
}

/// A device read: command, parameters and the field wanted from the response
struct DeviceRead {
    opcode: OpCode,
    params: Vec<u8>,
    field: ExpectedField,
}

impl FmHal {
    /// Sets a control. Controls without a setter are logged and ignored.
    pub fn set_fm_ctrl(&self, ctrl: Control, val: i32) -> Result<()> {
        let _guard = lock(&self.ctrl_lock);
        debug!("set {:?} = {}", ctrl, val);
        let res = self.set_ctrl_locked(ctrl, val);
        if let Err(e) = &res {
            error!("set {:?} failed: {}", ctrl, e);
        }
        res
    }

    /// Reads a control, blocking on the controller for device-backed values
    pub fn get_fm_ctrl(&self, ctrl: Control) -> Result<i32> {
        let _guard = lock(&self.ctrl_lock);
        if self.is_closing() {
            return Err(FmError::NotReady);
        }
        if let Some(val) = self.cached_ctrl(ctrl) {
            return Ok(val);
        }
        let read = self.device_read(ctrl)?;
        self.query(read.opcode, &read.params, Expect::Read(read.field))
    }

    /// Starts a device read whose value arrives through `FmHalCallbacks`
    pub fn request_fm_ctrl(&self, ctrl: Control) -> Result<()> {
        let _guard = lock(&self.ctrl_lock);
        let read = self.device_read(ctrl)?;
        self.send_tracked(read.opcode, &read.params, Expect::Read(read.field), Reply::Callback)
            .map(|_| ())
    }

    fn cached_ctrl(&self, ctrl: Control) -> Option<i32> {
        let state = self.state();
        match ctrl {
            Control::Freq => Some(state.fm_st_rsp.station_freq),
            Control::UpperBand => Some(state.recv_conf.requested().band_high_limit),
            Control::LowerBand => Some(state.recv_conf.requested().band_low_limit),
            Control::AudioMute => Some(i32::from(state.mute_mode.requested().hard_mute)),
            _ => None,
        }
    }

    fn device_read(&self, ctrl: Control) -> Result<DeviceRead> {
        if let Some(field) = ctrl.ch_det_field() {
            return Ok(DeviceRead {
                opcode: OpCode::GetChDetThreshold,
                params: Vec::new(),
                field: ExpectedField::ChDet(field),
            });
        }
        if let Some(field) = ctrl.default_data_field() {
            let (mode, len) = default_data_block(field);
            return Ok(DeviceRead {
                opcode: OpCode::DefaultDataRead,
                params: DefaultDataRead::block(mode, len).to_bytes(),
                field: ExpectedField::DefaultData(field),
            });
        }
        if let Some(field) = ctrl.blend_field() {
            return Ok(DeviceRead {
                opcode: OpCode::GetBlendTable,
                params: Vec::new(),
                field: ExpectedField::Blend(field),
            });
        }
        let field = match ctrl {
            Control::IoverC => ExpectedField::StationDbg(StationDbgField::IoverC),
            Control::IntDet => ExpectedField::StationDbg(StationDbgField::InfDetOut),
            Control::GetSinr | Control::Rmssi => {
                let mode = self.state().mode;
                if mode != FmMode::Recv {
                    error!("{:?} needs the receiver on, radio is {:?}", ctrl, mode);
                    return Err(FmError::InvalidArgument);
                }
                let field =
                    if ctrl == Control::GetSinr { StationField::Sinr } else { StationField::Rssi };
                ExpectedField::Station(field)
            }
            _ => {
                error!("{:?} cannot be read", ctrl);
                return Err(FmError::InvalidArgument);
            }
        };
        let opcode = match field {
            ExpectedField::Station(_) => OpCode::GetStationParam,
            _ => OpCode::StationDbgParam,
        };
        Ok(DeviceRead { opcode, params: Vec::new(), field })
    }

    fn set_ctrl_locked(&self, ctrl: Control, val: i32) -> Result<()> {
        if let Some(field) = ctrl.ch_det_field() {
            return self.set_ch_det(ctrl, field, val);
        }
        if let Some(field) = ctrl.default_data_field() {
            return self.set_default_data(field, val);
        }
        if let Some(field) = ctrl.blend_field() {
            return self.set_blend(ctrl, field, val);
        }
        match ctrl {
            Control::AudioMute => {
                let staged = self.state().mute_mode.stage(|m| m.hard_mute = val as u8);
                self.send_staged(Staged::Mute(staged))
            }
            Control::SoftMute => {
                let staged = self.state().mute_mode.stage(|m| m.soft_mute = val as u8);
                self.send_staged(Staged::Mute(staged))
            }
            Control::SrchMode => {
                self.state().search_mode = check(ctrl, val, 0..=7)? as u8;
                Ok(())
            }
            Control::ScanDwell => {
                self.state().scan_time = check(ctrl, val, 0..=7)? as u8;
                Ok(())
            }
            Control::SrchOn => self.search_req(val != 0, SearchDirection::Up),
            Control::Seek => {
                let dir = if val != 0 { SearchDirection::Up } else { SearchDirection::Down };
                self.search_req(true, dir)
            }
            Control::State => self.set_state(val),
            Control::Region => self.set_region(val),
            Control::SignalTh => self.set_signal_threshold(val as u8),
            Control::SrchPty => {
                let pty = check(ctrl, val, 0..=31)? as u8;
                let mut state = self.state();
                state.srch_rds.srch_pty = pty;
                state.srch_st_list.srch_pty = pty;
                Ok(())
            }
            Control::SrchPi => {
                self.state().srch_rds.srch_pi = check(ctrl, val, 0..=0xFFFF)? as u16;
                Ok(())
            }
            Control::SrchCnt => {
                self.state().srch_st_list.srch_list_max =
                    check(ctrl, val, 0..=MAX_SRCH_LIST_STATIONS as i32)? as u8;
                Ok(())
            }
            Control::Spacing => self.edit_recv_conf(|c| c.ch_spacing = val as u8),
            Control::Emphasis => self.edit_recv_conf(|c| c.emphasis = val as u8),
            Control::RdsStd | Control::RdsOn => self.edit_recv_conf(|c| c.rds_std = val as u8),
            Control::UpperBand => {
                self.state().recv_conf.requested_mut().band_high_limit = val;
                Ok(())
            }
            Control::LowerBand => {
                self.state().recv_conf.requested_mut().band_low_limit = val;
                Ok(())
            }
            Control::RdsGroupMask => {
                let mask = {
                    let oda_agt = self.rds().oda_agt();
                    let mut state = self.state();
                    state.grp_mask |= oda_agt | val as u32;
                    state.grp_mask
                };
                self.rds_group_mask(mask, 1)
            }
            Control::RdsdBuf => {
                self.state().rds_grp.requested_mut().rds_buf_size = val as u32;
                Ok(())
            }
            Control::RdsGroupProc => {
                let word = *self.state().rds_grp_proc.requested() | (val as u32 & 0xFF);
                self.rds_group_process(word)
            }
            Control::PsAll => {
                let word =
                    *self.state().rds_grp_proc.requested() | ((val as u32) << RDS_CONFIG_OFFSET);
                self.rds_group_process(word)
            }
            Control::AfJump => {
                let word = {
                    let mut state = self.state();
                    state.af_jump = val != 0;
                    (*state.rds_grp_proc.requested() & !AF_JUMP_ENABLE)
                        | ((val as u32) << RDS_AF_JUMP_OFFSET)
                };
                self.rds_group_process(word)
            }
            Control::LpMode => self.set_low_power_mode(val != 0),
            Control::Antenna => self.set_antenna(val as u8),
            Control::Freq => self.tune_station(val),
            Control::AudioMode => self.set_stereo_mode(if val != 0 { 0 } else { 1 }, 1),
            Control::RdsGrpCounters => self.read_group_counters(val as u8),
            Control::RdsGrpCountersExt => self.read_group_counters_ext(val as u8),
            Control::SetNotchFilter => self.enable_notch(val as u8),
            Control::RivaAccsAddr => {
                self.state().riva.cmd_params.start_addr = val as u32;
                Ok(())
            }
            Control::RivaAccsLen => {
                let len = check(ctrl, val, 1..=MAX_RIVA_PEEK_RSP_SIZE as i32)?;
                self.state().riva.cmd_params.length = len as u8;
                Ok(())
            }
            Control::RivaPeek => {
                let req = {
                    let mut state = self.state();
                    state.riva.cmd_params.subopcode = RIVA_PEEK_OPCODE;
                    state.riva.cmd_params
                };
                self.peek_data(&req)
            }
            Control::RivaPoke => {
                let req = {
                    let mut state = self.state();
                    if state.riva.cmd_params.length as usize > MAX_RIVA_PEEK_RSP_SIZE {
                        return Err(FmError::InvalidArgument);
                    }
                    state.riva.cmd_params.subopcode = RIVA_POKE_OPCODE;
                    state.riva.clone()
                };
                self.poke_data(&req)
            }
            Control::SsbiAccsAddr => {
                self.state().ssbi.start_addr = val as u16;
                Ok(())
            }
            Control::SsbiPoke => {
                let req = {
                    let mut state = self.state();
                    state.ssbi.data = val as u8;
                    state.ssbi
                };
                self.ssbi_poke(&req)
            }
            Control::SsbiPeek => {
                let req = {
                    let mut state = self.state();
                    state.ssbi_peek.start_address = val as u16;
                    state.ssbi_peek
                };
                self.ssbi_peek(&req)
            }
            Control::AgcUcctrl => {
                self.state().agc.ucctrl = val as u8;
                Ok(())
            }
            Control::AgcGainState => {
                let req = {
                    let mut state = self.state();
                    state.agc.ucgainstate = val as u8;
                    state.agc
                };
                self.set_get_reset_agc(&req)
            }
            Control::EnableLpf => self.low_pass_filter(val as u8),
            Control::Audio => {
                info!("{} slimbus port", if val != 0 { "enable" } else { "disable" });
                self.enable_slimbus(val as u8)
            }
            _ => {
                warn!("{:?} cannot be set", ctrl);
                Ok(())
            }
        }
    }

    fn edit_recv_conf<F: FnOnce(&mut RecvConf)>(&self, edit: F) -> Result<()> {
        let staged = self.state().recv_conf.stage(edit);
        self.send_staged(Staged::RecvConf(staged))
    }

    /// Starts or cancels a search using the configured search mode
    fn search_req(&self, on: bool, dir: SearchDirection) -> Result<()> {
        let dir = dir as u8;
        enum Search {
            List(SearchStationList),
            Rds(SearchRdsStation),
            Plain(SearchStation),
            Cancel,
        }
        let (saved, search) = {
            let mut state = self.state();
            let saved = state.search_on;
            state.search_on = on;
            let srch = state.search_mode & SRCH_MODE;
            let scan_time = state.scan_time;
            let search = if !on {
                Search::Cancel
            } else {
                match SearchMode::from_u8(srch) {
                    Some(SearchMode::ScanForStrong) | Some(SearchMode::ScanForWeak) => {
                        state.srch_st_list.srch_list_dir = dir;
                        state.srch_st_list.srch_list_mode = srch;
                        Search::List(state.srch_st_list)
                    }
                    Some(SearchMode::RdsSeekPty)
                    | Some(SearchMode::RdsScanPty)
                    | Some(SearchMode::RdsSeekPi) => {
                        let st = &mut state.srch_rds.srch_station;
                        st.srch_mode = srch - SEARCH_RDS_STNS_MODE_OFFSET;
                        st.srch_dir = dir;
                        st.scan_time = scan_time;
                        Search::Rds(state.srch_rds)
                    }
                    _ => {
                        state.srch_st.srch_mode = srch;
                        state.srch_st.scan_time = scan_time;
                        state.srch_st.srch_dir = dir;
                        Search::Plain(state.srch_st)
                    }
                }
            };
            (saved, search)
        };
        let res = match search {
            Search::List(req) => self.search_station_list(&req),
            Search::Rds(req) => self.search_rds_stations(&req),
            Search::Plain(req) => self.search_stations(&req),
            Search::Cancel => self.cancel_search(),
        };
        if res.is_err() {
            self.state().search_on = saved;
        }
        res
    }

    fn set_state(&self, val: i32) -> Result<()> {
        let prev = self.state().mode;
        let (next, res) = match FmMode::from_i32(val) {
            Some(FmMode::Recv) => {
                self.state().mode = FmMode::RecvTurningOn;
                (FmMode::RecvTurningOn, self.enable_recv())
            }
            Some(FmMode::Trans) => {
                self.state().mode = FmMode::TransTurningOn;
                (FmMode::TransTurningOn, self.enable_trans())
            }
            Some(FmMode::Off) => {
                self.state().mode = FmMode::TurningOff;
                let res = match prev {
                    FmMode::Trans | FmMode::TransTurningOn => self.disable_trans(),
                    _ => self.disable_recv(),
                };
                (FmMode::TurningOff, res)
            }
            _ => {
                warn!("unsupported radio state {}", val);
                return Ok(());
            }
        };
        if res.is_err() {
            let mut state = self.state();
            if state.mode == next {
                state.mode = prev;
            }
        }
        res
    }

    fn set_region(&self, region: i32) -> Result<()> {
        let saved = std::mem::replace(&mut self.state().region, region);
        let res = self.resend_recv_conf();
        if res.is_err() {
            self.state().region = saved;
        }
        res
    }

    /// Low power mode stops RDS processing and async events, except AF jump
    pub fn set_low_power_mode(&self, low_power: bool) -> Result<()> {
        let (current, af_jump) = {
            let state = self.state();
            (state.low_power, state.af_jump)
        };
        if current == low_power {
            return Ok(());
        }
        if low_power {
            let word = if af_jump { AF_JUMP_ENABLE } else { 0 };
            self.rds_group_process(word)?;
            self.set_event_mask(0)?;
        } else {
            self.set_event_mask(SIG_LEVEL_INTR | RDS_SYNC_INTR | AUDIO_CTRL_INTR)?;
            self.rds_group_process(RDS_GRP_PROC_ALL)?;
        }
        self.state().low_power = low_power;
        Ok(())
    }

    fn set_ch_det(&self, ctrl: Control, field: ChDetField, val: i32) -> Result<()> {
        let range = match field {
            ChDetField::SinrThreshold => -128..=127,
            _ => 0..=255,
        };
        let val = check(ctrl, val, range)?;
        self.query(OpCode::GetChDetThreshold, &[], Expect::Refresh)?;
        let staged = self.state().ch_det.stage(|th| match field {
            ChDetField::SinrThreshold => th.sinr = val as i8,
            ChDetField::SinrSamples => th.sinr_samples = val as u8,
            ChDetField::IntfLow => th.low_th = val as u8,
            ChDetField::IntfHigh => th.high_th = val as u8,
        });
        self.send_staged(Staged::ChDet(staged))
    }

    fn set_default_data(&self, field: DefaultDataField, val: i32) -> Result<()> {
        let (mode, len) = default_data_block(field);
        let read = DefaultDataRead::block(mode, len);
        self.query(OpCode::DefaultDataRead, &read.to_bytes(), Expect::Refresh)?;
        let mut write = DefaultDataWrite::from_block(mode, len, &self.state().def_data.data);
        let offset = match field {
            DefaultDataField::SinrFirstStage => SINRFIRSTSTAGE_OFFSET,
            DefaultDataField::RmssiFirstStage => RMSSIFIRSTSTAGE_OFFSET,
            DefaultDataField::SearchAlgo => SRCH_ALGO_TYPE_OFFSET,
            DefaultDataField::AfRmssiTh => AF_RMSSI_TH_OFFSET,
            DefaultDataField::GdChRmssiTh => GD_CH_RMSSI_TH_OFFSET,
            DefaultDataField::AfRmssiSamples => AF_RMSSI_SAMPLES_OFFSET,
            DefaultDataField::RepeatCount => RX_REPEATE_BYTE_OFFSET,
            DefaultDataField::AfAlgo => AF_ALGO_OFFSET,
            DefaultDataField::AfSinrGdChTh => AF_SINR_GD_CH_TH_OFFSET,
            DefaultDataField::AfSinrTh => AF_SINR_TH_OFFSET,
            DefaultDataField::Cf0Th12 => {
                write.data[CF0TH12_BYTE2_OFFSET] = (val >> 8) as u8;
                CF0TH12_BYTE1_OFFSET
            }
            DefaultDataField::TunePower => return Err(FmError::InvalidArgument),
        };
        write.data[offset] = val as u8;
        self.default_data_write(&write)
    }

    fn set_blend(&self, ctrl: Control, field: BlendField, val: i32) -> Result<()> {
        let val = check(ctrl, val, -128..=127)? as i8;
        self.query(OpCode::GetBlendTable, &[], Expect::Refresh)?;
        let staged = self.state().blend_tbl.stage(|tbl| match field {
            BlendField::SinrHi => tbl.set_sinr_hi(val),
            BlendField::RmssiHi => tbl.set_rmssi_hi(val),
        });
        self.send_staged(Staged::Blend(staged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_session, respond_with, Call};
    use fm_hal::EventSink;
    use fm_packet::event::build_command_complete;

    #[test]
    fn ids_round_trip() {
        assert_eq!(Control::from_id(FM_CTRL_BASE), Some(Control::SrchMode));
        assert_eq!(Control::from_id(0x0800_003E), Some(Control::Rmssi));
        assert_eq!(Control::from_id(0x0800_0000), None);
    }

    #[test]
    fn out_of_range_values_never_reach_the_transport() {
        let (hal, transport, _recorder) = new_session();
        for (ctrl, val) in &[
            (Control::SrchMode, 8),
            (Control::ScanDwell, -1),
            (Control::SrchPty, 32),
            (Control::SrchPi, 0x10000),
            (Control::SrchCnt, 21),
            (Control::RivaAccsLen, 0),
            (Control::RivaAccsLen, 252),
            (Control::SinrSamples, 256),
            (Control::SinrThreshold, -129),
            (Control::IntfHighThreshold, -1),
            (Control::BlendSinrHi, 128),
        ] {
            assert!(
                matches!(hal.set_fm_ctrl(*ctrl, *val), Err(FmError::InvalidArgument)),
                "{:?} = {}",
                ctrl,
                val
            );
        }
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn search_uses_configured_mode() {
        let (hal, transport, _recorder) = new_session();
        hal.set_fm_ctrl(Control::SrchMode, SearchMode::RdsSeekPi as i32).unwrap();
        hal.set_fm_ctrl(Control::SrchPi, 0xC0DE).unwrap();
        hal.set_fm_ctrl(Control::ScanDwell, 3).unwrap();
        hal.set_fm_ctrl(Control::Seek, 0).unwrap();
        assert!(hal.state().search_on);

        hal.set_fm_ctrl(Control::SrchMode, SearchMode::ScanForStrong as i32).unwrap();
        hal.set_fm_ctrl(Control::SrchOn, 1).unwrap();
        hal.set_fm_ctrl(Control::SrchOn, 0).unwrap();
        assert!(!hal.state().search_on);

        let sent = transport.sent();
        assert_eq!(sent[0].opcode(), OpCode::SearchRdsStations as u16);
        assert_eq!(sent[0].params(), &[2, 3, SearchDirection::Down as u8, 0, 0xDE, 0xC0]);
        assert_eq!(sent[1].opcode(), OpCode::SearchStationList as u16);
        assert_eq!(&sent[1].params()[..2], &[2, SearchDirection::Up as u8]);
        assert_eq!(sent[2].opcode(), OpCode::CancelSearch as u16);
    }

    #[test]
    fn failed_search_restores_flag() {
        let (hal, transport, _recorder) = new_session();
        transport.fail_transmit(true);
        assert!(hal.set_fm_ctrl(Control::SrchOn, 1).is_err());
        assert!(!hal.state().search_on);
    }

    #[test]
    fn state_machine_turns_on_and_off() {
        let (hal, transport, recorder) = new_session();
        hal.set_fm_ctrl(Control::State, FmMode::Recv as i32).unwrap();
        assert_eq!(hal.state().mode, FmMode::RecvTurningOn);
        hal.process_event(build_command_complete(OpCode::EnableRecv as u16, 0, &[]).unwrap());
        assert_eq!(hal.state().mode, FmMode::Recv);

        hal.set_fm_ctrl(Control::State, FmMode::Off as i32).unwrap();
        assert_eq!(transport.sent()[1].opcode(), OpCode::DisableRecv as u16);
        hal.process_event(build_command_complete(OpCode::DisableRecv as u16, 0, &[]).unwrap());
        assert_eq!(transport.close_calls(), 1);
        hal.close_done();

        assert_eq!(
            recorder.calls(),
            vec![
                Call::ThreadEvent(crate::callbacks::ThreadEvent::Attach),
                Call::Enabled,
                Call::Disabled,
                Call::ThreadEvent(crate::callbacks::ThreadEvent::Detach),
            ]
        );
        assert!(matches!(hal.set_fm_ctrl(Control::Freq, 98100), Err(FmError::NotReady)));
    }

    #[test]
    fn failed_enable_falls_back_to_off() {
        let (hal, _transport, _recorder) = new_session();
        hal.set_fm_ctrl(Control::State, FmMode::Recv as i32).unwrap();
        hal.process_event(build_command_complete(OpCode::EnableRecv as u16, 1, &[]).unwrap());
        assert_eq!(hal.state().mode, FmMode::Off);
    }

    #[test]
    fn group_mask_includes_oda_carrier() {
        let (hal, transport, _recorder) = new_session();
        // 3A group announcing eRT on 12A
        let group = crate::rds::RdsGroup::parse(&[0, 0, 0, 24, 6 << 3, 0, 0, 0x52, 0x65]).unwrap();
        let _ = hal.rds().feed(&group);
        hal.set_fm_ctrl(Control::RdsGroupMask, 0x01).unwrap();
        let sent = transport.sent();
        assert_eq!(&sent[0].params()[..4], &((1u32 << 24) | 0x01).to_le_bytes());
        assert_eq!(sent[0].params()[4], 1);
    }

    #[test]
    fn af_jump_edits_one_bit() {
        let (hal, transport, _recorder) = new_session();
        hal.set_fm_ctrl(Control::RdsGroupProc, 0xEF).unwrap();
        hal.set_fm_ctrl(Control::AfJump, 1).unwrap();
        hal.set_fm_ctrl(Control::AfJump, 0).unwrap();
        let words: Vec<u32> = transport
            .sent()
            .iter()
            .map(|cmd| {
                let p = cmd.params();
                u32::from_le_bytes([p[0], p[1], p[2], p[3]])
            })
            .collect();
        assert_eq!(words, vec![0xEF, 0xFF, 0xEF]);
        assert!(!hal.state().af_jump);
    }

    #[test]
    fn low_power_mode_keeps_af_jump() {
        let (hal, transport, _recorder) = new_session();
        hal.state().af_jump = true;
        hal.set_fm_ctrl(Control::LpMode, 1).unwrap();
        hal.set_fm_ctrl(Control::LpMode, 1).unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].opcode(), OpCode::RdsGroupProcess as u16);
        assert_eq!(sent[0].params()[0], AF_JUMP_ENABLE as u8);
        assert_eq!(sent[1].opcode(), OpCode::SetEventMask as u16);
        assert_eq!(sent[1].params(), &[0]);
        assert!(hal.state().low_power);
    }

    #[test]
    fn cached_controls_answer_without_the_controller() {
        let (hal, transport, _recorder) = new_session();
        hal.set_fm_ctrl(Control::LowerBand, 87500).unwrap();
        hal.set_fm_ctrl(Control::UpperBand, 108000).unwrap();
        hal.state().fm_st_rsp.station_freq = 101100;
        assert_eq!(hal.get_fm_ctrl(Control::LowerBand).unwrap(), 87500);
        assert_eq!(hal.get_fm_ctrl(Control::UpperBand).unwrap(), 108000);
        assert_eq!(hal.get_fm_ctrl(Control::Freq).unwrap(), 101100);
        assert_eq!(hal.get_fm_ctrl(Control::AudioMute).unwrap(), 0);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn station_reads_need_the_receiver() {
        let (hal, transport, _recorder) = new_session();
        assert!(matches!(hal.get_fm_ctrl(Control::GetSinr), Err(FmError::InvalidArgument)));
        assert!(matches!(hal.request_fm_ctrl(Control::Rmssi), Err(FmError::InvalidArgument)));
        assert!(transport.sent().is_empty());

        hal.state().mode = FmMode::Recv;
        let mut body = 98100i32.to_le_bytes().to_vec();
        body.extend_from_slice(&[1, 0xC4, 1, 1, 0, 9, 2]);
        transport.set_responder(respond_with(OpCode::GetStationParam, 0, &body));
        assert_eq!(hal.get_fm_ctrl(Control::GetSinr).unwrap(), 9);
        assert_eq!(hal.get_fm_ctrl(Control::Rmssi).unwrap(), -60);
    }

    #[test]
    fn default_data_gets_sign_extend() {
        let (hal, transport, _recorder) = new_session();
        let block = [6, 0xF0, 2, 3, 4, 5, 6];
        transport.set_responder(respond_with(OpCode::DefaultDataRead, 0, &block));
        assert_eq!(hal.get_fm_ctrl(Control::GoodChRmssiTh).unwrap(), -16);
        assert_eq!(hal.get_fm_ctrl(Control::AfSinrTh).unwrap(), 6);
        assert_eq!(transport.sent()[0].params(), &[FM_AFJUMP_CONFG_MODE, FM_AFJUMP_CNFG_LEN, 0, 0]);
    }

    #[test]
    fn default_data_set_reads_then_writes() {
        let (hal, transport, _recorder) = new_session();
        transport.set_responder(respond_with(
            OpCode::DefaultDataRead,
            0,
            &[8, 1, 2, 3, 4, 5, 6, 7, 8],
        ));
        hal.set_fm_ctrl(Control::Cf0Th12, 0x1234).unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].params(), &[FM_SRCH_CONFG_MODE, FM_SRCH_CNFG_LEN, 0, 0]);
        assert_eq!(sent[1].opcode(), OpCode::DefaultDataWrite as u16);
        assert_eq!(
            sent[1].params(),
            &[FM_SRCH_CONFG_MODE, FM_SRCH_CNFG_LEN, 1, 2, 3, 0x34, 0x12, 6, 7, 8]
        );
    }

    #[test]
    fn ch_det_set_is_read_modify_write() {
        let (hal, transport, _recorder) = new_session();
        transport.set_responder(respond_with(OpCode::GetChDetThreshold, 0, &[0xF6, 20, 30, 40]));
        hal.set_fm_ctrl(Control::IntfHighThreshold, 99).unwrap();
        let sent = transport.sent();
        assert_eq!(sent[1].opcode(), OpCode::SetChDetThreshold as u16);
        assert_eq!(sent[1].params(), &[0xF6, 20, 30, 99]);

        let done = build_command_complete(OpCode::SetChDetThreshold as u16, 0, &[]).unwrap();
        hal.process_event(done);
        assert_eq!(hal.state().ch_det.applied().high_th, 99);
    }

    #[test]
    fn read_modify_write_stops_when_the_read_fails() {
        let (hal, transport, _recorder) = new_session();
        transport.set_responder(respond_with(OpCode::GetBlendTable, 1, &[]));
        assert!(matches!(hal.set_fm_ctrl(Control::BlendRmssiHi, 10), Err(FmError::Device(1))));
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn request_reports_through_callbacks() {
        let (hal, transport, recorder) = new_session();
        transport.set_responder(respond_with(OpCode::GetBlendTable, 0, &[0, 0, 0, 0, 0, 0xFB, 30]));
        hal.request_fm_ctrl(Control::BlendSinrHi).unwrap();
        assert_eq!(recorder.calls(), vec![Call::GetBlend(-5, 0)]);
    }

    #[test]
    fn region_resends_receiver_config() {
        let (hal, transport, _recorder) = new_session();
        hal.state().recv_conf.sync(RecvConf { band_low_limit: 76000, ..Default::default() });
        hal.set_fm_ctrl(Control::Region, 2).unwrap();
        assert_eq!(hal.state().region, 2);
        let sent = transport.sent();
        assert_eq!(sent[0].opcode(), OpCode::SetRecvConf as u16);
        assert_eq!(&sent[0].params()[4..8], &76000i32.to_le_bytes());

        transport.fail_transmit(true);
        assert!(hal.set_fm_ctrl(Control::Region, 3).is_err());
        assert_eq!(hal.state().region, 2);
    }

    #[test]
    fn unknown_reads_are_rejected() {
        let (hal, _transport, _recorder) = new_session();
        assert!(matches!(hal.get_fm_ctrl(Control::Antenna), Err(FmError::InvalidArgument)));
        assert!(hal.set_fm_ctrl(Control::IoverC, 1).is_ok());
    }

    #[test]
    fn device_reads_are_refused_from_callbacks() {
        let (hal, transport, _recorder) = new_session();
        let worker = hal.clone();
        let (blend, freq) = hal
            .rt
            .block_on(hal.rt.spawn(async move {
                (worker.get_fm_ctrl(Control::BlendSinrHi), worker.get_fm_ctrl(Control::Freq))
            }))
            .unwrap();
        assert!(matches!(blend, Err(FmError::EventContext)));
        // cached values never wait on the controller
        assert!(freq.is_ok());
        assert!(transport.sent().is_empty());
    }
}
