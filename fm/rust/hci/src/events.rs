//! Event demultiplexer: routes every inbound event to its handler

use crate::callbacks::{
    AfList, ErtText, ExtCountryCode, ProgramService, RadioText, RtPlusTag, SearchList,
};
use crate::rds::{RdsGroup, RdsOutput};
use crate::session::FmHal;
use bytes::{Buf, Bytes};
use fm_packet::error::{ensure_len, PacketError, Result};
use fm_packet::params::TuneStatus;
use fm_packet::{CommandComplete, CommandStatus, EventCode, EventPacket};
use log::{debug, error, info, warn};

const RDS_PTYPE: usize = 2;
const RDS_PID_LOWER: usize = 3;
const RDS_PID_HIGHER: usize = 4;
const RDS_OFFSET: usize = 5;
const RDS_PS_LENGTH_OFFSET: usize = 7;
const RDS_PS_DATA_OFFSET: usize = 8;
/// Characters per PS name
const RDS_STRING: usize = 8;
const RT_A_B_FLAG_OFFSET: usize = 1;
const MAX_RT_LENGTH: usize = 64;
const CARRIAGE_RETURN: u8 = 0x0D;

const PI_CODE_OFFSET: usize = 4;
const AF_SIZE_OFFSET: usize = 6;
const AF_LIST_OFFSET: usize = 7;
/// Most alternative frequencies one event can carry
pub const AF_LIST_MAX: usize = 25;

const STN_NUM_OFFSET: usize = 0;
const STN_FREQ_OFFSET: usize = 1;
const PARAMS_PER_STATION: usize = 8;
/// Most stations a list search reports
pub const MAX_SRCH_LIST_STATIONS: usize = 20;
const KHZ_TO_MHZ: i32 = 1000;
/// Channel numbers count 50 kHz steps
const CHANNELS_PER_MHZ: i32 = 20;

const RT_PLUS_GRP_OFFSET: usize = 3;
const RT_PLUS_TAGS_OFFSET: usize = 4;
const RT_PLUS_LEN: usize = 15;
const ECC_OFFSET: usize = 3;
const ECC_DATA_OFFSET: usize = 4;
const ECC_EVENT_BUFSIZE: usize = 12;

impl FmHal {
    /// Runs the handler for one validated event
    pub(crate) fn dispatch_event(&self, evt: &EventPacket) {
        let code = match evt.code() {
            Some(code) => code,
            None => {
                debug!("ignoring unknown event {:#04x}", evt.code_raw());
                return;
            }
        };
        debug!("event {:?} with {} bytes", code, evt.params().len());
        let params = evt.params();
        let res = match code {
            EventCode::TuneStatus => self.on_tune_status(params),
            EventCode::SearchProgress
            | EventCode::SearchRdsProgress
            | EventCode::SearchListProgress => {
                self.callbacks().scan_next();
                Ok(())
            }
            EventCode::StereoStatus => self.on_stereo_status(params),
            EventCode::RdsLockStatus => self.on_rds_lock_status(params),
            EventCode::RdsRxData => self.on_rds_group(params),
            EventCode::ProgramService => self.on_program_service(params),
            EventCode::RadioText => self.on_radio_text(params),
            EventCode::AfList => self.on_af_list(params),
            EventCode::CommandComplete => self.on_command_complete(&evt.params_bytes()),
            EventCode::CommandStatus => self.on_command_status(params),
            EventCode::SearchComplete | EventCode::SearchRdsComplete => {
                self.on_search_complete();
                Ok(())
            }
            EventCode::SearchListComplete => self.on_search_list(params),
            EventCode::RadioTextPlusId => on_rt_plus_id(params),
            EventCode::RadioTextPlusTag => self.on_rt_plus_tag(params),
            EventCode::ExtCountryCode => self.on_ext_country_code(params),
            EventCode::DriverRdsEvent => self.on_driver_rds(params),
            EventCode::HwError => {
                error!("controller reported a hardware error, closing");
                self.begin_close();
                Ok(())
            }
            _ => {
                debug!("no handler for {:?}", code);
                Ok(())
            }
        };
        if let Err(e) = res {
            error!("dropping {:?} event: {}", code, e);
        }
    }

    fn on_tune_status(&self, params: &[u8]) -> Result<()> {
        let st = TuneStatus::parse(params)?;
        self.state().fm_st_rsp = st;
        debug!("tuned to {}", st.station_freq);
        let cb = self.callbacks();
        cb.tune(st.station_freq);
        cb.stereo_status(st.stereo_prg != 0);
        cb.rds_available(st.rds_sync_status != 0);
        Ok(())
    }

    fn on_stereo_status(&self, params: &[u8]) -> Result<()> {
        ensure_len(params, 1)?;
        self.callbacks().stereo_status(params[0] != 0);
        Ok(())
    }

    fn on_rds_lock_status(&self, params: &[u8]) -> Result<()> {
        ensure_len(params, 1)?;
        self.callbacks().rds_available(params[0] != 0);
        Ok(())
    }

    fn on_rds_group(&self, params: &[u8]) -> Result<()> {
        let group = RdsGroup::parse(params)?;
        let out = self.rds().feed(&group);
        match out {
            Some(RdsOutput::OdaRegistered) => self.callbacks().oda_update(),
            Some(RdsOutput::Ert(ert)) => self.callbacks().ert(&ert),
            None => {}
        }
        Ok(())
    }

    fn on_program_service(&self, params: &[u8]) -> Result<()> {
        ensure_len(params, RDS_PS_DATA_OFFSET)?;
        let num_ps = params[RDS_PS_LENGTH_OFFSET];
        let end = RDS_PS_DATA_OFFSET + num_ps as usize * RDS_STRING;
        ensure_len(params, end)?;
        self.callbacks().program_service(&ProgramService {
            num_ps,
            pty: params[RDS_PTYPE],
            pi: pi_code(params),
            text: params[RDS_PS_DATA_OFFSET..end].to_vec(),
        });
        Ok(())
    }

    fn on_radio_text(&self, params: &[u8]) -> Result<()> {
        ensure_len(params, RDS_OFFSET)?;
        let text: Vec<u8> = params[RDS_OFFSET..]
            .iter()
            .take(MAX_RT_LENGTH)
            .take_while(|b| **b != CARRIAGE_RETURN)
            .copied()
            .collect();
        if text.is_empty() {
            return Ok(());
        }
        self.callbacks().radio_text(&RadioText {
            pty: params[RDS_PTYPE],
            pi: pi_code(params),
            ab_flag: params[RT_A_B_FLAG_OFFSET],
            text,
        });
        Ok(())
    }

    fn on_af_list(&self, params: &[u8]) -> Result<()> {
        let list = parse_af_list(params)?;
        self.callbacks().af_list(&list);
        Ok(())
    }

    fn on_command_complete(&self, params: &Bytes) -> Result<()> {
        let cc = CommandComplete::parse(params)?;
        self.responses().dispatch(self, &cc);
        Ok(())
    }

    /// A rejected command gets no command-complete, so its request is
    /// completed here with the rejection status
    fn on_command_status(&self, params: &[u8]) -> Result<()> {
        let st = CommandStatus::parse(params)?;
        if st.status != 0 {
            warn!("command {:#06x} rejected with status {:#04x}", st.opcode, st.status);
            self.responses().reject(self, st.opcode, st.status);
        } else {
            debug!("command {:#06x} accepted", st.opcode);
        }
        Ok(())
    }

    fn on_search_complete(&self) {
        let freq = {
            let mut state = self.state();
            state.search_on = false;
            state.fm_st_rsp.station_freq
        };
        info!("search complete at {}", freq);
        self.callbacks().seek_complete(freq);
    }

    fn on_search_list(&self, params: &[u8]) -> Result<()> {
        ensure_len(params, STN_FREQ_OFFSET)?;
        let found = params[STN_NUM_OFFSET] as usize;
        let count = found.min(MAX_SRCH_LIST_STATIONS);
        ensure_len(params, STN_FREQ_OFFSET + count * PARAMS_PER_STATION)?;
        let band_low = self.state().recv_conf.requested().band_low_limit;
        let stations = params[STN_FREQ_OFFSET..]
            .chunks_exact(PARAMS_PER_STATION)
            .take(count)
            .map(|mut st| {
                let abs_freq = st.get_i32_le();
                ((abs_freq - band_low) * CHANNELS_PER_MHZ / KHZ_TO_MHZ) as u16
            })
            .collect();
        self.callbacks().search_list(&SearchList { stations });
        Ok(())
    }

    fn on_rt_plus_tag(&self, params: &[u8]) -> Result<()> {
        self.callbacks().rt_plus(&parse_rt_plus(params)?);
        Ok(())
    }

    fn on_ext_country_code(&self, params: &[u8]) -> Result<()> {
        let end = ECC_DATA_OFFSET + ECC_EVENT_BUFSIZE - RDS_OFFSET;
        ensure_len(params, end)?;
        self.callbacks().ext_country_code(&ExtCountryCode {
            pty: params[RDS_PTYPE],
            pi: pi_code(params),
            ecc: params[ECC_OFFSET],
            data: params[ECC_DATA_OFFSET..end].to_vec(),
        });
        Ok(())
    }

    /// RDS data already decoded by the driver, tagged with the event it
    /// stands for. The body follows the callback data layouts.
    fn on_driver_rds(&self, params: &[u8]) -> Result<()> {
        ensure_len(params, 1)?;
        let rds_type = params[0];
        let body = &params[1..];
        debug!("driver rds event type {:#04x}", rds_type);
        let cb = self.callbacks();
        match EventCode::from_wire(rds_type) {
            Some(EventCode::RadioText) => {
                ensure_len(body, RDS_OFFSET)?;
                let len = body[0] as usize;
                ensure_len(body, RDS_OFFSET + len)?;
                cb.radio_text(&RadioText {
                    pty: body[1],
                    pi: u16::from_le_bytes([body[2], body[3]]),
                    ab_flag: body[4],
                    text: body[RDS_OFFSET..RDS_OFFSET + len].to_vec(),
                });
            }
            Some(EventCode::ProgramService) => {
                ensure_len(body, RDS_OFFSET)?;
                let num_ps = body[0];
                let end = RDS_OFFSET + num_ps as usize * RDS_STRING;
                ensure_len(body, end)?;
                cb.program_service(&ProgramService {
                    num_ps,
                    pty: body[1],
                    pi: u16::from_le_bytes([body[2], body[3]]),
                    text: body[RDS_OFFSET..end].to_vec(),
                });
            }
            Some(EventCode::AfList) => cb.af_list(&parse_af_list(body)?),
            Some(EventCode::RadioTextPlusTag) => {
                ensure_len(body, RT_PLUS_LEN)?;
                cb.rt_plus(&RtPlusTag {
                    pty: body[1],
                    pi: u16::from_le_bytes([body[2], body[3]]),
                    group_type: body[4],
                    tags: body[RDS_OFFSET..RT_PLUS_LEN].to_vec(),
                });
            }
            Some(EventCode::ERadioText) => {
                ensure_len(body, 3)?;
                let len = body[0] as usize;
                ensure_len(body, 3 + len)?;
                cb.ert(&ErtText {
                    utf8: body[1] != 0,
                    formatting_dir: body[2] != 0,
                    text: body[3..3 + len].to_vec(),
                });
            }
            _ => debug!("unknown driver rds event {:#04x}", rds_type),
        }
        Ok(())
    }
}

fn pi_code(params: &[u8]) -> u16 {
    u16::from_le_bytes([params[RDS_PID_LOWER], params[RDS_PID_HIGHER]])
}

/// `[tune_freq: i32, pi: u16, size: u8, freqs: i32 * size]`
fn parse_af_list(params: &[u8]) -> Result<AfList> {
    ensure_len(params, AF_LIST_OFFSET)?;
    let size = params[AF_SIZE_OFFSET] as usize;
    if size > AF_LIST_MAX {
        return Err(PacketError::OutOfRange { field: "af_size", value: size });
    }
    ensure_len(params, AF_LIST_OFFSET + size * 4)?;
    let mut buf = params;
    let tune_freq = buf.get_i32_le();
    let pi = u16::from_le_bytes([params[PI_CODE_OFFSET], params[PI_CODE_OFFSET + 1]]);
    let mut freqs = &params[AF_LIST_OFFSET..];
    let freqs = (0..size).map(|_| freqs.get_i32_le()).collect();
    Ok(AfList { tune_freq, pi, freqs })
}

fn parse_rt_plus(params: &[u8]) -> Result<RtPlusTag> {
    let end = RT_PLUS_TAGS_OFFSET + RT_PLUS_LEN - RDS_OFFSET;
    ensure_len(params, end)?;
    Ok(RtPlusTag {
        pty: params[RDS_PTYPE],
        pi: pi_code(params),
        group_type: params[RT_PLUS_GRP_OFFSET],
        tags: params[RT_PLUS_TAGS_OFFSET..end].to_vec(),
    })
}

fn on_rt_plus_id(params: &[u8]) -> Result<()> {
    let id = parse_rt_plus(params)?;
    debug!("RT+ id, group type {:#04x}", id.group_type);
    Ok(())
}
