//! Test doubles: a transport that records commands and can answer them
//! inline, and callbacks that record every call.

use crate::callbacks::{
    AfList, ErtText, ExtCountryCode, FmHalCallbacks, ProgramService, RadioText, RtPlusTag,
    SearchList, ThreadEvent,
};
use crate::config::FmConfig;
use crate::lock;
use crate::session::{FmHal, FmHalFactory};
use bytes::Bytes;
use fm_hal::{EventSink, FmHciTransport, HalError, TransportFactory};
use fm_packet::event::build_command_complete;
use fm_packet::{CommandPacket, OpCode};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Runtime;

/// One recorded callback
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Enabled,
    Disabled,
    Tune(i32),
    SeekComplete(i32),
    ScanNext,
    SearchList(SearchList),
    StereoStatus(bool),
    RdsAvailable(bool),
    AfList(AfList),
    RadioText(RadioText),
    ProgramService(ProgramService),
    OdaUpdate,
    RtPlus(RtPlusTag),
    Ert(ErtText),
    ExtCountryCode(ExtCountryCode),
    RdsGroupCounters(Vec<u8>),
    RdsGroupCountersExt(Vec<u8>),
    Peek(Vec<u8>),
    SsbiPeek(Vec<u8>),
    AgcGain(Vec<u8>),
    ThreadEvent(ThreadEvent),
    GetChDetThreshold(i32, u8),
    SetChDetThreshold(u8),
    GetSignalThreshold(i32, u8),
    DefaultDataRead(i32, u8),
    DefaultDataWrite(u8),
    GetBlend(i32, u8),
    SetBlend(u8),
    StationParam(i32, u8),
    StationDbgParam(i32, u8),
    Slimbus(u8),
    Softmute(u8),
}

#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    fn push(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

impl FmHalCallbacks for Recorder {
    fn enabled(&self) {
        self.push(Call::Enabled);
    }
    fn disabled(&self) {
        self.push(Call::Disabled);
    }
    fn tune(&self, freq: i32) {
        self.push(Call::Tune(freq));
    }
    fn seek_complete(&self, freq: i32) {
        self.push(Call::SeekComplete(freq));
    }
    fn scan_next(&self) {
        self.push(Call::ScanNext);
    }
    fn search_list(&self, list: &SearchList) {
        self.push(Call::SearchList(list.clone()));
    }
    fn stereo_status(&self, stereo: bool) {
        self.push(Call::StereoStatus(stereo));
    }
    fn rds_available(&self, available: bool) {
        self.push(Call::RdsAvailable(available));
    }
    fn af_list(&self, list: &AfList) {
        self.push(Call::AfList(list.clone()));
    }
    fn radio_text(&self, rt: &RadioText) {
        self.push(Call::RadioText(rt.clone()));
    }
    fn program_service(&self, ps: &ProgramService) {
        self.push(Call::ProgramService(ps.clone()));
    }
    fn oda_update(&self) {
        self.push(Call::OdaUpdate);
    }
    fn rt_plus(&self, tag: &RtPlusTag) {
        self.push(Call::RtPlus(tag.clone()));
    }
    fn ert(&self, ert: &ErtText) {
        self.push(Call::Ert(ert.clone()));
    }
    fn ext_country_code(&self, ecc: &ExtCountryCode) {
        self.push(Call::ExtCountryCode(ecc.clone()));
    }
    fn rds_group_counters(&self, counters: &[u8]) {
        self.push(Call::RdsGroupCounters(counters.to_vec()));
    }
    fn rds_group_counters_ext(&self, counters: &[u8]) {
        self.push(Call::RdsGroupCountersExt(counters.to_vec()));
    }
    fn peek(&self, data: &[u8]) {
        self.push(Call::Peek(data.to_vec()));
    }
    fn ssbi_peek(&self, data: &[u8]) {
        self.push(Call::SsbiPeek(data.to_vec()));
    }
    fn agc_gain(&self, data: &[u8]) {
        self.push(Call::AgcGain(data.to_vec()));
    }
    fn thread_event(&self, event: ThreadEvent) {
        self.push(Call::ThreadEvent(event));
    }
    fn get_ch_det_threshold(&self, val: i32, status: u8) {
        self.push(Call::GetChDetThreshold(val, status));
    }
    fn set_ch_det_threshold(&self, status: u8) {
        self.push(Call::SetChDetThreshold(status));
    }
    fn get_signal_threshold(&self, val: i32, status: u8) {
        self.push(Call::GetSignalThreshold(val, status));
    }
    fn default_data_read(&self, val: i32, status: u8) {
        self.push(Call::DefaultDataRead(val, status));
    }
    fn default_data_write(&self, status: u8) {
        self.push(Call::DefaultDataWrite(status));
    }
    fn get_blend(&self, val: i32, status: u8) {
        self.push(Call::GetBlend(val, status));
    }
    fn set_blend(&self, status: u8) {
        self.push(Call::SetBlend(status));
    }
    fn station_param(&self, val: i32, status: u8) {
        self.push(Call::StationParam(val, status));
    }
    fn station_dbg_param(&self, val: i32, status: u8) {
        self.push(Call::StationDbgParam(val, status));
    }
    fn slimbus(&self, status: u8) {
        self.push(Call::Slimbus(status));
    }
    fn softmute(&self, status: u8) {
        self.push(Call::Softmute(status));
    }
}

/// Produces the events a controller would send back for a command
pub type Responder = Box<dyn Fn(&CommandPacket) -> Vec<Bytes> + Send + Sync>;

/// Answers `opcode` with a command-complete carrying `status` and `rsp`
pub fn respond_with(opcode: OpCode, status: u8, rsp: &[u8]) -> Responder {
    let rsp = rsp.to_vec();
    Box::new(move |cmd| {
        if cmd.opcode() != u16::from(opcode) {
            return Vec::new();
        }
        build_command_complete(opcode.into(), status, &rsp).into_iter().collect()
    })
}

#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<CommandPacket>>,
    responder: Mutex<Option<Responder>>,
    sink: Mutex<Option<Weak<dyn EventSink>>>,
    close_calls: AtomicUsize,
    fail: AtomicBool,
}

impl MockTransport {
    /// Commands transmitted so far
    pub fn sent(&self) -> Vec<CommandPacket> {
        lock(&self.sent).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Makes every later transmit fail
    pub fn fail_transmit(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Events from `responder` are delivered before `transmit` returns
    pub fn set_responder(&self, responder: Responder) {
        *lock(&self.responder) = Some(responder);
    }
}

impl FmHciTransport for MockTransport {
    fn transmit(&self, cmd: CommandPacket) -> Result<(), HalError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HalError::Closed);
        }
        let events = match lock(&self.responder).as_ref() {
            Some(responder) => responder(&cmd),
            None => Vec::new(),
        };
        lock(&self.sent).push(cmd);
        let sink = lock(&self.sink).as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            for evt in events {
                sink.process_event(evt);
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockTransportFactory {
    failing: bool,
    opened: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    /// Factory whose init always fails
    pub fn failing() -> Self {
        MockTransportFactory { failing: true, ..Default::default() }
    }

    /// Most recently opened transport
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        lock(&self.opened).last().cloned()
    }
}

impl TransportFactory for MockTransportFactory {
    fn init(
        &self,
        sink: Arc<dyn EventSink>,
        _rt: Arc<Runtime>,
    ) -> Result<Arc<dyn FmHciTransport>, HalError> {
        if self.failing {
            return Err(HalError::Closed);
        }
        let transport = Arc::new(MockTransport::default());
        *lock(&transport.sink) = Some(Arc::downgrade(&sink));
        lock(&self.opened).push(transport.clone());
        Ok(transport)
    }
}

/// Factory with short timeouts that never kills the test process
pub fn new_factory(hal_timeout: Duration) -> FmHalFactory {
    let rt = Arc::new(Runtime::new().unwrap());
    let config = FmConfig {
        cmd_timeout: Duration::from_millis(200),
        hal_timeout,
        kill_on_stuck_close: false,
    };
    FmHalFactory::new(rt, config)
}

/// An open session with its transport and recorded callbacks
pub fn new_session() -> (Arc<FmHal>, Arc<MockTransport>, Arc<Recorder>) {
    let factory = new_factory(Duration::from_millis(50));
    let transports = MockTransportFactory::default();
    let recorder = Arc::new(Recorder::default());
    let hal = factory.hal_init(recorder.clone(), &transports).unwrap();
    (hal, transports.last().unwrap(), recorder)
}
