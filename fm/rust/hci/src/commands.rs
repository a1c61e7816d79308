//! Command dispatcher: one method per controller command.
//!
//! Every command is queued in the pending table before it goes out, so its
//! command-complete finds the right request even when it beats `transmit`
//! back. Plain methods report through `FmHalCallbacks`; `query` blocks the
//! caller until the response or the command timeout.

use crate::error::{FmError, Result};
use crate::pending::{
    BlendField, ChDetField, Expect, ExpectedField, Reply, StationDbgField, StationField,
};
use crate::radio::Staged;
use crate::session::FmHal;
use fm_packet::params::{
    AgcRequest, CommandParams, DefaultDataRead, DefaultDataWrite, RecvConf, RivaPeek, RivaPoke,
    SearchRdsStation, SearchStation, SearchStationList, SsbiPeek, SsbiPoke, TransConf,
    TuneStation,
};
use fm_packet::{CommandPacket, OpCode};
use log::{debug, error, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::timeout;

impl FmHal {
    /// Frames `params` behind `opcode` and hands the packet to the transport
    pub fn send_fm_cmd_pkt(&self, opcode: u16, params: &[u8]) -> Result<()> {
        let transport = self.transport().ok_or_else(|| {
            error!("command {:#06x} sent before hal init", opcode);
            FmError::NotReady
        })?;
        let cmd = CommandPacket::build(opcode, params)?;
        debug!("sending {:?}", cmd);
        transport.transmit(cmd)?;
        Ok(())
    }

    /// Queues the request, then sends. The request is withdrawn again when
    /// the command never left.
    pub(crate) fn send_tracked(
        &self,
        opcode: OpCode,
        params: &[u8],
        expect: Expect,
        reply: Reply,
    ) -> Result<u64> {
        let id = self.pending().register(opcode, expect, reply);
        if let Err(e) = self.send_fm_cmd_pkt(opcode.into(), params) {
            warn!("{:?} not sent: {}", opcode, e);
            self.pending().withdraw(opcode, id);
            return Err(e);
        }
        Ok(id)
    }

    fn send(&self, opcode: OpCode, params: &[u8]) -> Result<()> {
        self.send_tracked(opcode, params, Expect::Status, Reply::Callback).map(|_| ())
    }

    fn read(&self, opcode: OpCode, params: &[u8], field: ExpectedField) -> Result<()> {
        self.send_tracked(opcode, params, Expect::Read(field), Reply::Callback).map(|_| ())
    }

    /// Sends a command and blocks until its response, at most `cmd_timeout`.
    /// Returns the value the response handler extracted. Refused on the
    /// runtime's own threads, where events are delivered.
    pub(crate) fn query(&self, opcode: OpCode, params: &[u8], expect: Expect) -> Result<i32> {
        if Handle::try_current().is_ok() {
            error!("blocking {:?} from the event delivery context", opcode);
            return Err(FmError::EventContext);
        }
        let (tx, rx) = oneshot::channel();
        let id = self.send_tracked(opcode, params, expect, Reply::Waiter(tx))?;
        let res = self.rt.block_on(async { timeout(self.config.cmd_timeout, rx).await });
        match res {
            Ok(Ok(done)) if done.status == 0 => Ok(done.value),
            Ok(Ok(done)) => Err(FmError::Device(done.status)),
            Ok(Err(_)) => Err(FmError::NotReady),
            Err(_) => {
                error!("no response to {:?} within {:?}", opcode, self.config.cmd_timeout);
                self.pending().detach(opcode, id);
                Err(FmError::Timeout)
            }
        }
    }

    /// Sends a staged configuration write. The response handler commits it,
    /// a failed send rolls it back right away.
    pub(crate) fn send_staged(&self, staged: Staged) -> Result<()> {
        let opcode = staged.opcode();
        let params = staged.params();
        let res = self.send_tracked(
            opcode,
            &params,
            Expect::Commit(staged.clone()),
            Reply::Callback,
        );
        if res.is_err() {
            self.state().apply(staged, false);
        }
        res.map(|_| ())
    }

    pub fn enable_recv(&self) -> Result<()> {
        self.send(OpCode::EnableRecv, &[])
    }

    pub fn disable_recv(&self) -> Result<()> {
        self.send(OpCode::DisableRecv, &[])
    }

    /// Reads the receiver configuration back into the session state
    pub fn get_recv_conf(&self) -> Result<()> {
        self.send(OpCode::GetRecvConf, &[])
    }

    pub fn set_recv_conf(&self, conf: RecvConf) -> Result<()> {
        let staged = self.state().recv_conf.stage(|c| *c = conf);
        self.send_staged(Staged::RecvConf(staged))
    }

    /// Sends the receiver configuration the host currently holds
    pub(crate) fn resend_recv_conf(&self) -> Result<()> {
        let staged = self.state().recv_conf.stage(|_| {});
        self.send_staged(Staged::RecvConf(staged))
    }

    pub fn set_mute_mode(&self, hard_mute: u8, soft_mute: u8) -> Result<()> {
        let staged = self.state().mute_mode.stage(|m| {
            m.hard_mute = hard_mute;
            m.soft_mute = soft_mute;
        });
        self.send_staged(Staged::Mute(staged))
    }

    pub fn set_stereo_mode(&self, stereo_mode: u8, sig_blend: u8) -> Result<()> {
        let staged = self.state().stereo_mode.stage(|s| {
            s.stereo_mode = stereo_mode;
            s.sig_blend = sig_blend;
            s.intf_blend = 0;
            s.most_switch = 0;
        });
        self.send_staged(Staged::Stereo(staged))
    }

    pub fn set_antenna(&self, antenna: u8) -> Result<()> {
        let staged = self.state().antenna.stage(|a| *a = antenna);
        self.send_staged(Staged::Antenna(staged))
    }

    pub fn set_signal_threshold(&self, threshold: u8) -> Result<()> {
        self.send(OpCode::SetSignalThreshold, &threshold.to_bytes())
    }

    /// Reported through `get_signal_threshold`
    pub fn get_signal_threshold(&self) -> Result<()> {
        self.send(OpCode::GetSignalThreshold, &[])
    }

    /// Reported through `station_param`
    pub fn get_station_param(&self, field: StationField) -> Result<()> {
        self.read(OpCode::GetStationParam, &[], ExpectedField::Station(field))
    }

    pub fn search_stations(&self, req: &SearchStation) -> Result<()> {
        self.send(OpCode::SearchStations, &req.to_bytes())
    }

    pub fn search_rds_stations(&self, req: &SearchRdsStation) -> Result<()> {
        self.send(OpCode::SearchRdsStations, &req.to_bytes())
    }

    pub fn search_station_list(&self, req: &SearchStationList) -> Result<()> {
        self.send(OpCode::SearchStationList, &req.to_bytes())
    }

    pub fn cancel_search(&self) -> Result<()> {
        self.send(OpCode::CancelSearch, &[])
    }

    /// Replaces the set of groups forwarded by the controller
    pub fn rds_group_mask(&self, mask: u32, buf_size: u32) -> Result<()> {
        let staged = self.state().rds_grp.stage(|g| {
            g.rds_grp_enable_mask = mask;
            g.rds_buf_size = buf_size;
            g.en_rds_change_filter = 0;
        });
        self.send_staged(Staged::RdsGroup(staged))
    }

    /// Replaces the RDS processing word
    pub fn rds_group_process(&self, word: u32) -> Result<()> {
        let staged = self.state().rds_grp_proc.stage(|p| *p = word);
        self.send_staged(Staged::RdsGroupProcess(staged))
    }

    pub fn enable_wan_avoidance(&self, enable: u8) -> Result<()> {
        self.send(OpCode::EnableWanAvoidance, &enable.to_bytes())
    }

    pub fn enable_notch(&self, notch: u8) -> Result<()> {
        self.send(OpCode::EnableNotch, &notch.to_bytes())
    }

    pub fn set_event_mask(&self, mask: u8) -> Result<()> {
        let staged = self.state().event_mask.stage(|m| *m = mask);
        self.send_staged(Staged::EventMask(staged))
    }

    /// Sends the channel detection thresholds the host holds
    pub fn set_ch_det_threshold(&self) -> Result<()> {
        let staged = self.state().ch_det.stage(|_| {});
        self.send_staged(Staged::ChDet(staged))
    }

    /// Reported through `get_ch_det_threshold`
    pub fn get_ch_det_threshold(&self, field: ChDetField) -> Result<()> {
        self.read(OpCode::GetChDetThreshold, &[], ExpectedField::ChDet(field))
    }

    /// Sends the blend table the host holds
    pub fn set_blend_table(&self) -> Result<()> {
        let staged = self.state().blend_tbl.stage(|_| {});
        self.send_staged(Staged::Blend(staged))
    }

    /// Reported through `get_blend`
    pub fn get_blend_table(&self, field: BlendField) -> Result<()> {
        self.read(OpCode::GetBlendTable, &[], ExpectedField::Blend(field))
    }

    pub fn low_pass_filter(&self, enable: u8) -> Result<()> {
        self.send(OpCode::LowPassFilter, &enable.to_bytes())
    }

    pub fn enable_trans(&self) -> Result<()> {
        self.send(OpCode::EnableTrans, &[])
    }

    pub fn disable_trans(&self) -> Result<()> {
        self.send(OpCode::DisableTrans, &[])
    }

    pub fn set_trans_conf(&self, conf: TransConf) -> Result<()> {
        let staged = self.state().trans_conf.stage(|c| *c = conf);
        self.send_staged(Staged::TransConf(staged))
    }

    /// Tunes to `freq` kHz. The tune status event reports the result.
    pub fn tune_station(&self, freq: i32) -> Result<()> {
        self.send(OpCode::TuneStation, &TuneStation { freq }.to_bytes())
    }

    /// Reported through `default_data_read`
    pub fn default_data_read(&self, req: &DefaultDataRead, field: ExpectedField) -> Result<()> {
        self.read(OpCode::DefaultDataRead, &req.to_bytes(), field)
    }

    pub fn default_data_write(&self, req: &DefaultDataWrite) -> Result<()> {
        self.send(OpCode::DefaultDataWrite, &req.to_bytes())
    }

    pub fn reset(&self) -> Result<()> {
        self.send(OpCode::Reset, &[])
    }

    pub fn do_calibration(&self, mode: u8) -> Result<()> {
        self.send(OpCode::DoCalibration, &mode.to_bytes())
    }

    /// Loads a calibration blob, passed through untouched
    pub fn set_calibration(&self, data: &[u8]) -> Result<()> {
        self.send(OpCode::SetCalibration, data)
    }

    /// Loads a spur table, passed through untouched
    pub fn set_spur_table(&self, table: &[u8]) -> Result<()> {
        self.send(OpCode::SetSpurTable, table)
    }

    pub fn get_spur_table(&self, freq: i32, len: u8) -> Result<()> {
        let mut params = TuneStation { freq }.to_bytes();
        len.write_to(&mut params);
        self.send(OpCode::GetSpurTable, &params)
    }

    /// Reported through `rds_group_counters`
    pub fn read_group_counters(&self, reset: u8) -> Result<()> {
        self.send(OpCode::ReadGroupCounters, &reset.to_bytes())
    }

    /// Reported through `rds_group_counters_ext`
    pub fn read_group_counters_ext(&self, reset: u8) -> Result<()> {
        self.send(OpCode::ReadGroupCountersExt, &reset.to_bytes())
    }

    /// Reported through `peek`
    pub fn peek_data(&self, req: &RivaPeek) -> Result<()> {
        self.send(OpCode::PeekData, &req.to_bytes())
    }

    pub fn poke_data(&self, req: &RivaPoke) -> Result<()> {
        self.send(OpCode::PokeData, &req.to_bytes())
    }

    /// Reported through `ssbi_peek`
    pub fn ssbi_peek(&self, req: &SsbiPeek) -> Result<()> {
        self.send(OpCode::SsbiPeek, &req.to_bytes())
    }

    pub fn ssbi_poke(&self, req: &SsbiPoke) -> Result<()> {
        self.send(OpCode::SsbiPoke, &req.to_bytes())
    }

    pub fn tone_generator(&self, tone: u8) -> Result<()> {
        self.send(OpCode::ToneGenerator, &tone.to_bytes())
    }

    /// Reported through `agc_gain` when the controller returns a gain
    pub fn set_get_reset_agc(&self, req: &AgcRequest) -> Result<()> {
        self.send(OpCode::SetGetResetAgc, &req.to_bytes())
    }

    /// Reported through `station_dbg_param`
    pub fn get_station_dbg_param(&self, field: StationDbgField) -> Result<()> {
        self.read(OpCode::StationDbgParam, &[], ExpectedField::StationDbg(field))
    }

    pub fn enable_slimbus(&self, enable: u8) -> Result<()> {
        self.send(OpCode::EnableSlimbus, &enable.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::FmError;
    use crate::pending::{BlendField, ChDetField, Expect, ExpectedField, FieldCategory};
    use crate::testing::{new_session, respond_with, Call};
    use fm_hal::EventSink;
    use fm_packet::event::{build_command_complete, build_event};
    use fm_packet::params::{RecvConf, SearchStation};
    use fm_packet::{EventCode, OpCode};
    use std::time::{Duration, Instant};

    #[test]
    fn commands_are_framed() {
        let (hal, transport, _recorder) = new_session();
        hal.tune_station(98100).unwrap();
        hal.search_stations(&SearchStation { srch_mode: 1, scan_time: 2, srch_dir: 0 }).unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].opcode(), OpCode::TuneStation as u16);
        assert_eq!(sent[0].params(), &98100i32.to_le_bytes());
        assert_eq!(&sent[1].as_bytes()[..], &[0x0E, 0x4C, 3, 1, 2, 0]);
    }

    #[test]
    fn closed_session_refuses_commands() {
        let (hal, transport, _recorder) = new_session();
        hal.close_done();
        assert!(matches!(hal.enable_recv(), Err(FmError::NotReady)));
        assert!(transport.sent().is_empty());
        assert_eq!(hal.pending().drain().len(), 0);
    }

    #[test]
    fn failed_send_rolls_back_staged_state() {
        let (hal, transport, _recorder) = new_session();
        transport.fail_transmit(true);
        let conf = RecvConf { ch_spacing: 2, ..Default::default() };
        assert!(matches!(hal.set_recv_conf(conf), Err(FmError::Transport(_))));
        assert_eq!(hal.state().recv_conf.requested().ch_spacing, 0);
        assert_eq!(hal.pending().mask(FieldCategory::ChDet), 0);
    }

    #[test]
    fn staged_state_commits_on_success_only() {
        let (hal, transport, _recorder) = new_session();
        let conf = RecvConf { emphasis: 1, ..Default::default() };
        hal.set_recv_conf(conf).unwrap();
        assert_eq!(hal.state().recv_conf.applied().emphasis, 0);
        hal.process_event(build_command_complete(OpCode::SetRecvConf as u16, 0, &[]).unwrap());
        assert_eq!(hal.state().recv_conf.applied().emphasis, 1);

        let conf = RecvConf { emphasis: 0, ..Default::default() };
        hal.set_recv_conf(conf).unwrap();
        hal.process_event(build_command_complete(OpCode::SetRecvConf as u16, 3, &[]).unwrap());
        assert_eq!(hal.state().recv_conf.applied().emphasis, 1);
        assert_eq!(hal.state().recv_conf.requested().emphasis, 1);
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn query_gets_the_requested_field() {
        let (hal, transport, recorder) = new_session();
        transport.set_responder(respond_with(OpCode::GetChDetThreshold, 0, &[0xF6, 20, 30, 40]));
        let field = ExpectedField::ChDet(ChDetField::IntfLow);
        assert_eq!(hal.query(OpCode::GetChDetThreshold, &[], Expect::Read(field)).unwrap(), 30);
        let field = ExpectedField::ChDet(ChDetField::SinrThreshold);
        assert_eq!(hal.query(OpCode::GetChDetThreshold, &[], Expect::Read(field)).unwrap(), -10);
        // the bridge never goes through callbacks
        assert!(recorder.calls().is_empty());
        assert_eq!(hal.state().ch_det.applied().high_th, 40);
    }

    #[test]
    fn query_reports_device_status() {
        let (hal, transport, _recorder) = new_session();
        transport.set_responder(respond_with(OpCode::GetBlendTable, 0x0C, &[]));
        assert!(matches!(
            hal.query(OpCode::GetBlendTable, &[], Expect::Refresh),
            Err(FmError::Device(0x0C))
        ));
    }

    #[test]
    fn query_times_out() {
        let (hal, _transport, recorder) = new_session();
        let started = Instant::now();
        let res = hal.query(OpCode::GetBlendTable, &[], Expect::Refresh);
        assert!(matches!(res, Err(FmError::Timeout)));
        let timeout = hal.config.cmd_timeout;
        fm_common::assert_near!(
            started.elapsed(),
            timeout + Duration::from_millis(100),
            Duration::from_millis(100)
        );

        // a late response is absorbed by the request that timed out
        let tbl = [0, 0, 0, 0, 0, 7, 8];
        hal.process_event(build_command_complete(OpCode::GetBlendTable as u16, 0, &tbl).unwrap());
        assert!(recorder.calls().is_empty());

        hal.get_blend_table(BlendField::SinrHi).unwrap();
        hal.process_event(build_command_complete(OpCode::GetBlendTable as u16, 0, &tbl).unwrap());
        assert_eq!(recorder.calls(), vec![Call::GetBlend(7, 0)]);
    }

    #[test]
    fn query_recovers_after_unanswered_command() {
        let (hal, transport, _recorder) = new_session();
        let field = ExpectedField::Blend(BlendField::RmssiHi);
        assert!(matches!(
            hal.query(OpCode::GetBlendTable, &[], Expect::Read(field)),
            Err(FmError::Timeout)
        ));

        transport.set_responder(respond_with(OpCode::GetBlendTable, 0, &[0, 0, 0, 0, 0, 7, 8]));
        for _ in 0..3 {
            assert_eq!(hal.query(OpCode::GetBlendTable, &[], Expect::Read(field)).unwrap(), 8);
        }
        assert_eq!(hal.pending().mask(FieldCategory::Blend), 0);
    }

    #[test]
    fn query_fails_with_the_rejection_status() {
        let (hal, transport, _recorder) = new_session();
        transport.set_responder(Box::new(|cmd| {
            let [lo, hi] = cmd.opcode().to_le_bytes();
            build_event(EventCode::CommandStatus as u8, &[0x0C, 1, lo, hi]).into_iter().collect()
        }));
        let field = ExpectedField::Blend(BlendField::SinrHi);
        assert!(matches!(
            hal.query(OpCode::GetBlendTable, &[], Expect::Read(field)),
            Err(FmError::Device(0x0C))
        ));
        assert!(hal.pending().take(OpCode::GetBlendTable).is_none());
    }

    #[test]
    fn query_is_refused_on_the_event_runtime() {
        let (hal, transport, _recorder) = new_session();
        let worker = hal.clone();
        let res = hal
            .rt
            .block_on(hal.rt.spawn(async move {
                worker.query(OpCode::GetBlendTable, &[], Expect::Refresh)
            }))
            .unwrap();
        assert!(matches!(res, Err(FmError::EventContext)));
        assert!(transport.sent().is_empty());
        assert!(!hal.is_closing());
    }

    #[test]
    fn pending_reads_show_in_the_mask() {
        let (hal, _transport, _recorder) = new_session();
        hal.get_ch_det_threshold(ChDetField::SinrSamples).unwrap();
        assert_eq!(hal.pending().mask(FieldCategory::ChDet), 1 << 2);
        assert_eq!(hal.pending().mask(FieldCategory::Blend), 0);
        hal.process_event(
            build_command_complete(OpCode::GetChDetThreshold as u16, 0, &[1, 2, 3, 4]).unwrap(),
        );
        assert_eq!(hal.pending().mask(FieldCategory::ChDet), 0);
    }
}
