//! Command-complete handlers, one per command with a meaningful response

use crate::callbacks::ThreadEvent;
use crate::error::HcStatus;
use crate::pending::{
    BlendField, ChDetField, DefaultDataField, Expect, ExpectedField, PendingRequest,
    StationDbgField, StationField,
};
use crate::radio::FmMode;
use crate::session::FmHal;
use fm_packet::params::{
    BlendTable, ChDetThreshold, DefaultData, RecvConf, StationDbgParam, TuneStatus,
    AF_ALGO_OFFSET, AF_RMSSI_SAMPLES_OFFSET, AF_RMSSI_TH_OFFSET, AF_SINR_GD_CH_TH_OFFSET,
    AF_SINR_TH_OFFSET, CF0TH12_BYTE1_OFFSET, CF0TH12_BYTE2_OFFSET, GD_CH_RMSSI_TH_OFFSET,
    RMSSIFIRSTSTAGE_OFFSET, RX_REPEATE_BYTE_OFFSET, SINRFIRSTSTAGE_OFFSET, SRCH_ALGO_TYPE_OFFSET,
};
use fm_packet::{CommandComplete, OpCode};
use log::{debug, error, info, warn};
use std::collections::HashMap;

/// Largest positive good-channel RMSSI threshold, bigger bytes are negative
const MAX_GD_CH_RMSSI_TH: i32 = 0x7F;
/// Largest positive first stage SINR, bigger bytes are negative
const MAX_SINR_FIRSTSTAGE: i32 = 0x7F;

const CORRUPTED: u8 = HcStatus::CorruptedBuffer as u8;

/// Handles the response to one command. `rsp` is the payload after the status byte.
pub trait ResponseHandler: Send + Sync {
    fn handle(&self, hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest);
}

impl<F> ResponseHandler for F
where
    F: Fn(&FmHal, u8, &[u8], PendingRequest) + Send + Sync,
{
    fn handle(&self, hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
        self(hal, status, rsp, req)
    }
}

/// Opcode to handler map
pub struct ResponseTable {
    handlers: HashMap<OpCode, Box<dyn ResponseHandler>>,
    fallback: Box<dyn ResponseHandler>,
}

impl ResponseTable {
    /// Table with every known handler registered
    pub fn new() -> Self {
        let mut table = ResponseTable { handlers: HashMap::new(), fallback: Box::new(status_rsp) };
        table.register(OpCode::EnableRecv, enable_rsp);
        table.register(OpCode::EnableTrans, enable_rsp);
        table.register(OpCode::DisableRecv, disable_rsp);
        table.register(OpCode::DisableTrans, disable_rsp);
        table.register(OpCode::GetRecvConf, recv_conf_rsp);
        table.register(OpCode::SetMuteMode, mute_rsp);
        table.register(OpCode::SetChDetThreshold, set_ch_det_rsp);
        table.register(OpCode::ReadGroupCounters, group_counters_rsp);
        table.register(OpCode::ReadGroupCountersExt, group_counters_ext_rsp);
        table.register(OpCode::PeekData, peek_rsp);
        table.register(OpCode::SsbiPeek, ssbi_peek_rsp);
        table.register(OpCode::SetGetResetAgc, agc_rsp);
        table.register(OpCode::GetChDetThreshold, get_ch_det_rsp);
        table.register(OpCode::GetSignalThreshold, sig_threshold_rsp);
        table.register(OpCode::DefaultDataRead, default_data_read_rsp);
        table.register(OpCode::DefaultDataWrite, default_data_write_rsp);
        table.register(OpCode::GetBlendTable, get_blend_rsp);
        table.register(OpCode::SetBlendTable, set_blend_rsp);
        table.register(OpCode::GetStationParam, station_rsp);
        table.register(OpCode::StationDbgParam, station_dbg_rsp);
        table.register(OpCode::EnableSlimbus, slimbus_rsp);
        table
    }

    fn register<H: ResponseHandler + 'static>(&mut self, opcode: OpCode, handler: H) {
        self.handlers.insert(opcode, Box::new(handler));
    }

    /// Routes a command-complete to its handler, with the oldest pending
    /// request for the opcode
    pub fn dispatch(&self, hal: &FmHal, cc: &CommandComplete) {
        let status = cc.status();
        let rsp = &cc.payload[1..];
        let opcode = OpCode::from_wire(cc.opcode);
        let req = opcode.and_then(|op| hal.pending().take(op)).unwrap_or_else(|| {
            debug!("no request waiting on {:#06x}", cc.opcode);
            PendingRequest::unsolicited()
        });
        if status != 0 {
            warn!("{:#06x} completed with status {:#04x}", cc.opcode, status);
        }
        self.handler(opcode).handle(hal, status, rsp, req);
    }

    /// Fails the oldest pending request for `opcode` with `status`. The
    /// handler sees an empty payload and reports its fallback value.
    pub fn reject(&self, hal: &FmHal, opcode: u16, status: u8) {
        let op = OpCode::from_wire(opcode);
        match op.and_then(|op| hal.pending().take(op)) {
            Some(req) => self.handler(op).handle(hal, status, &[], req),
            None => debug!("no request waiting on rejected {:#06x}", opcode),
        }
    }

    fn handler(&self, opcode: Option<OpCode>) -> &dyn ResponseHandler {
        match opcode.and_then(|op| self.handlers.get(&op)) {
            Some(handler) => handler.as_ref(),
            None => self.fallback.as_ref(),
        }
    }
}

impl Default for ResponseTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Settles whatever the request staged, then completes it
fn status_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    settle(hal, status, req);
}

/// Settles a staged write. Returns true when the caller wants a callback.
fn settle(hal: &FmHal, status: u8, mut req: PendingRequest) -> bool {
    if let Expect::Commit(staged) = std::mem::replace(&mut req.expect, Expect::Status) {
        hal.state().apply(staged, status == 0);
    }
    req.complete(status, 0)
}

fn enable_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    let slimbus = {
        let mut state = hal.state();
        state.mode = match (status, state.mode) {
            (0, FmMode::TransTurningOn) | (0, FmMode::Trans) => FmMode::Trans,
            (0, _) => FmMode::Recv,
            _ => FmMode::Off,
        };
        info!("radio mode now {:?}", state.mode);
        state.slimbus
    };
    req.complete(status, 0);
    if !slimbus {
        hal.callbacks().thread_event(ThreadEvent::Attach);
    }
    hal.callbacks().enabled();
}

fn disable_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    req.complete(status, 0);
    let turning_off = hal.state().mode == FmMode::TurningOff;
    if turning_off {
        info!("radio disabled, closing transport");
        hal.begin_close();
    }
}

fn recv_conf_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let mut status = status;
    if status == 0 {
        match RecvConf::parse(rsp) {
            Ok(conf) => hal.state().recv_conf.sync(conf),
            Err(e) => {
                error!("receiver config response: {}", e);
                status = CORRUPTED;
            }
        }
    }
    req.complete(status, 0);
}

fn mute_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    if settle(hal, status, req) {
        hal.callbacks().softmute(status);
    }
}

fn set_ch_det_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    if settle(hal, status, req) {
        hal.callbacks().set_ch_det_threshold(status);
    }
}

fn group_counters_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    if req.complete(status, 0) {
        hal.callbacks().rds_group_counters(rsp);
    }
}

fn group_counters_ext_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    if req.complete(status, 0) {
        hal.callbacks().rds_group_counters_ext(rsp);
    }
}

fn peek_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    if req.complete(status, 0) {
        hal.callbacks().peek(rsp);
    }
}

fn ssbi_peek_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    if req.complete(status, 0) {
        hal.callbacks().ssbi_peek(rsp);
    }
}

fn agc_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    if req.complete(status, 0) && status == 0 {
        hal.callbacks().agc_gain(rsp);
    }
}

fn get_ch_det_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let (status, val) = read_field(status, rsp, ChDetThreshold::parse, 0, |th| {
        hal.state().ch_det.sync(*th);
        match req.field() {
            Some(ExpectedField::ChDet(ChDetField::SinrThreshold)) => i32::from(th.sinr),
            Some(ExpectedField::ChDet(ChDetField::SinrSamples)) => i32::from(th.sinr_samples),
            Some(ExpectedField::ChDet(ChDetField::IntfLow)) => i32::from(th.low_th),
            Some(ExpectedField::ChDet(ChDetField::IntfHigh)) => i32::from(th.high_th),
            _ => 0,
        }
    });
    if req.complete(status, val) {
        hal.callbacks().get_ch_det_threshold(val, status);
    }
}

fn sig_threshold_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let val = match (status, rsp.first()) {
        (0, Some(th)) => i32::from(*th),
        _ => -1,
    };
    if req.complete(status, val) {
        hal.callbacks().get_signal_threshold(val, status);
    }
}

fn default_data_read_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let (status, val) = read_field(status, rsp, DefaultData::parse, 0, |data| {
        let val = match req.field() {
            Some(ExpectedField::DefaultData(field)) => default_data_value(data, field),
            _ => 0,
        };
        hal.state().def_data = data.clone();
        val
    });
    if req.complete(status, val) {
        hal.callbacks().default_data_read(val, status);
    }
}

fn default_data_value(data: &DefaultData, field: DefaultDataField) -> i32 {
    let byte = |offset| i32::from(data.byte(offset));
    match field {
        DefaultDataField::AfRmssiTh => byte(AF_RMSSI_TH_OFFSET),
        DefaultDataField::AfRmssiSamples => byte(AF_RMSSI_SAMPLES_OFFSET),
        DefaultDataField::GdChRmssiTh => signed(byte(GD_CH_RMSSI_TH_OFFSET), MAX_GD_CH_RMSSI_TH),
        DefaultDataField::SearchAlgo => byte(SRCH_ALGO_TYPE_OFFSET),
        DefaultDataField::SinrFirstStage => {
            signed(byte(SINRFIRSTSTAGE_OFFSET), MAX_SINR_FIRSTSTAGE)
        }
        DefaultDataField::RmssiFirstStage => byte(RMSSIFIRSTSTAGE_OFFSET),
        DefaultDataField::Cf0Th12 => byte(CF0TH12_BYTE1_OFFSET) | (byte(CF0TH12_BYTE2_OFFSET) << 8),
        DefaultDataField::TunePower => 0,
        DefaultDataField::RepeatCount => byte(RX_REPEATE_BYTE_OFFSET),
        DefaultDataField::AfAlgo => byte(AF_ALGO_OFFSET),
        DefaultDataField::AfSinrGdChTh => byte(AF_SINR_GD_CH_TH_OFFSET),
        DefaultDataField::AfSinrTh => byte(AF_SINR_TH_OFFSET),
    }
}

fn signed(val: i32, max: i32) -> i32 {
    if val > max {
        val - 256
    } else {
        val
    }
}

fn default_data_write_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    if req.complete(status, 0) {
        hal.callbacks().default_data_write(status);
    }
}

fn get_blend_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let (status, val) = read_field(status, rsp, BlendTable::parse, -1, |tbl| {
        let val = match req.field() {
            Some(ExpectedField::Blend(BlendField::SinrHi)) => i32::from(tbl.sinr_hi()),
            Some(ExpectedField::Blend(BlendField::RmssiHi)) => i32::from(tbl.rmssi_hi()),
            _ => -1,
        };
        hal.state().blend_tbl.sync(tbl.clone());
        val
    });
    if req.complete(status, val) {
        hal.callbacks().get_blend(val, status);
    }
}

fn set_blend_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    if settle(hal, status, req) {
        hal.callbacks().set_blend(status);
    }
}

fn station_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let sub_event = hal.state().fm_st_rsp.sub_event;
    let parse = |buf: &[u8]| TuneStatus::parse_body(sub_event, buf);
    let (status, val) = read_field(status, rsp, parse, -1, |st| {
        hal.state().fm_st_rsp = *st;
        match req.field() {
            Some(ExpectedField::Station(StationField::Rssi)) => i32::from(st.rssi),
            Some(ExpectedField::Station(StationField::Sinr)) => i32::from(st.sinr),
            _ => -1,
        }
    });
    if req.complete(status, val) {
        hal.callbacks().station_param(val, status);
    }
}

fn station_dbg_rsp(hal: &FmHal, status: u8, rsp: &[u8], req: PendingRequest) {
    let (status, val) = read_field(status, rsp, StationDbgParam::parse, -1, |dbg| {
        hal.state().st_dbg_param = *dbg;
        match req.field() {
            Some(ExpectedField::StationDbg(StationDbgField::InfDetOut)) => {
                i32::from(dbg.in_det_out)
            }
            Some(ExpectedField::StationDbg(StationDbgField::IoverC)) => i32::from(dbg.io_verc),
            _ => -1,
        }
    });
    if req.complete(status, val) {
        hal.callbacks().station_dbg_param(val, status);
    }
}

fn slimbus_rsp(hal: &FmHal, status: u8, _rsp: &[u8], req: PendingRequest) {
    hal.state().slimbus = true;
    hal.callbacks().thread_event(ThreadEvent::Attach);
    if req.complete(status, 0) {
        hal.callbacks().slimbus(status);
    }
}

/// Parses a successful read and extracts the wanted value from it. Failed
/// reads yield `fallback`; a response too short for its block turns into
/// a corrupted buffer status.
fn read_field<T, P, E>(status: u8, rsp: &[u8], parse: P, fallback: i32, extract: E) -> (u8, i32)
where
    P: Fn(&[u8]) -> fm_packet::error::Result<T>,
    E: FnOnce(&T) -> i32,
{
    if status != 0 {
        return (status, fallback);
    }
    match parse(rsp) {
        Ok(block) => (status, extract(&block)),
        Err(e) => {
            error!("malformed response: {}", e);
            (CORRUPTED, fallback)
        }
    }
}
