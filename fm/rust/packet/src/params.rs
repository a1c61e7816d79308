//! Parameter blocks carried by commands and command-complete responses.
//!
//! Every block is packed little-endian with no padding. Parsers take the
//! payload *after* the status byte unless noted otherwise, and check the
//! length before touching a field.

use crate::error::{ensure_len, PacketError, Result};
use bytes::{Buf, BufMut};

/// Anything that can be written as a command parameter block
pub trait CommandParams {
    /// Appends the wire form to `buf`
    fn write_to(&self, buf: &mut Vec<u8>);

    /// Wire form as a fresh buffer
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }
}

/// Receiver configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecvConf {
    pub emphasis: u8,
    pub ch_spacing: u8,
    pub rds_std: u8,
    pub hlsi: u8,
    pub band_low_limit: i32,
    pub band_high_limit: i32,
}

impl RecvConf {
    /// Size on the wire
    pub const SIZE: usize = 12;

    /// Parses the block that follows the status byte of a get-config response
    pub fn parse(mut buf: &[u8]) -> Result<RecvConf> {
        ensure_len(buf, Self::SIZE)?;
        Ok(RecvConf {
            emphasis: buf.get_u8(),
            ch_spacing: buf.get_u8(),
            rds_std: buf.get_u8(),
            hlsi: buf.get_u8(),
            band_low_limit: buf.get_i32_le(),
            band_high_limit: buf.get_i32_le(),
        })
    }
}

impl CommandParams for RecvConf {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.emphasis);
        buf.put_u8(self.ch_spacing);
        buf.put_u8(self.rds_std);
        buf.put_u8(self.hlsi);
        buf.put_i32_le(self.band_low_limit);
        buf.put_i32_le(self.band_high_limit);
    }
}

/// Transmitter configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransConf {
    pub emphasis: u8,
    pub rds_std: u8,
    pub band_low_limit: i32,
    pub band_high_limit: i32,
}

impl CommandParams for TransConf {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.emphasis);
        buf.put_u8(self.rds_std);
        buf.put_i32_le(self.band_low_limit);
        buf.put_i32_le(self.band_high_limit);
    }
}

/// Hard and soft mute
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MuteMode {
    pub hard_mute: u8,
    pub soft_mute: u8,
}

impl CommandParams for MuteMode {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.hard_mute);
        buf.put_u8(self.soft_mute);
    }
}

/// Stereo / mono selection and blending
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StereoMode {
    pub stereo_mode: u8,
    pub sig_blend: u8,
    pub intf_blend: u8,
    pub most_switch: u8,
}

impl CommandParams for StereoMode {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.stereo_mode);
        buf.put_u8(self.sig_blend);
        buf.put_u8(self.intf_blend);
        buf.put_u8(self.most_switch);
    }
}

/// Plain seek / scan request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStation {
    pub srch_mode: u8,
    pub scan_time: u8,
    pub srch_dir: u8,
}

impl CommandParams for SearchStation {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.srch_mode);
        buf.put_u8(self.scan_time);
        buf.put_u8(self.srch_dir);
    }
}

/// Seek / scan filtered on PTY or PI
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchRdsStation {
    pub srch_station: SearchStation,
    pub srch_pty: u8,
    pub srch_pi: u16,
}

impl CommandParams for SearchRdsStation {
    fn write_to(&self, buf: &mut Vec<u8>) {
        self.srch_station.write_to(buf);
        buf.put_u8(self.srch_pty);
        buf.put_u16_le(self.srch_pi);
    }
}

/// Strong / weak station list request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStationList {
    pub srch_list_mode: u8,
    pub srch_list_dir: u8,
    pub srch_list_max: u8,
    pub srch_pty: u8,
}

impl CommandParams for SearchStationList {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.srch_list_mode);
        buf.put_u8(self.srch_list_dir);
        buf.put_u8(self.srch_list_max);
        buf.put_u8(self.srch_pty);
    }
}

/// RDS groups the controller forwards to the host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RdsGroupMask {
    pub rds_grp_enable_mask: u32,
    pub rds_buf_size: u32,
    pub en_rds_change_filter: u8,
}

impl CommandParams for RdsGroupMask {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.rds_grp_enable_mask);
        buf.put_u32_le(self.rds_buf_size);
        buf.put_u8(self.en_rds_change_filter);
    }
}

/// Channel detection thresholds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChDetThreshold {
    pub sinr: i8,
    pub sinr_samples: u8,
    pub low_th: u8,
    pub high_th: u8,
}

impl ChDetThreshold {
    /// Size on the wire
    pub const SIZE: usize = 4;

    /// Parses the block following the status byte
    pub fn parse(mut buf: &[u8]) -> Result<ChDetThreshold> {
        ensure_len(buf, Self::SIZE)?;
        Ok(ChDetThreshold {
            sinr: buf.get_i8(),
            sinr_samples: buf.get_u8(),
            low_th: buf.get_u8(),
            high_th: buf.get_u8(),
        })
    }
}

impl CommandParams for ChDetThreshold {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_i8(self.sinr);
        buf.put_u8(self.sinr_samples);
        buf.put_u8(self.low_th);
        buf.put_u8(self.high_th);
    }
}

/// Search tuning block of the default-data area
pub const FM_SRCH_CONFG_MODE: u8 = 0x41;
/// Length of the search tuning block
pub const FM_SRCH_CNFG_LEN: u8 = 0x08;
/// AF jump tuning block of the default-data area
pub const FM_AFJUMP_CONFG_MODE: u8 = 0x42;
/// Length of the AF jump tuning block
pub const FM_AFJUMP_CNFG_LEN: u8 = 0x06;
/// PS transfer block of the default-data area
pub const RDS_PS0_XFR_MODE: u8 = 0x01;
/// Length of the PS transfer block
pub const RDS_PS0_LEN: u8 = 0x06;

/// Offsets into the search tuning block
pub const SRCH_ALGO_TYPE_OFFSET: usize = 0;
pub const SINRFIRSTSTAGE_OFFSET: usize = 1;
pub const RMSSIFIRSTSTAGE_OFFSET: usize = 2;
pub const CF0TH12_BYTE1_OFFSET: usize = 3;
pub const CF0TH12_BYTE2_OFFSET: usize = 4;
/// Offsets into the AF jump tuning block
pub const GD_CH_RMSSI_TH_OFFSET: usize = 0;
pub const AF_RMSSI_TH_OFFSET: usize = 1;
pub const AF_RMSSI_SAMPLES_OFFSET: usize = 2;
pub const AF_ALGO_OFFSET: usize = 3;
pub const AF_SINR_GD_CH_TH_OFFSET: usize = 4;
pub const AF_SINR_TH_OFFSET: usize = 5;
/// Offset of the repeat count in the PS transfer block
pub const RX_REPEATE_BYTE_OFFSET: usize = 5;

/// Largest default-data block
pub const DEFAULT_DATA_SIZE: usize = 249;

/// Default-data read request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultDataRead {
    pub mode: u8,
    pub length: u8,
    pub param_len: u8,
    pub param: u8,
}

impl DefaultDataRead {
    /// Reads a whole block with no extra parameter
    pub fn block(mode: u8, length: u8) -> DefaultDataRead {
        DefaultDataRead { mode, length, param_len: 0, param: 0 }
    }
}

impl CommandParams for DefaultDataRead {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.mode);
        buf.put_u8(self.length);
        buf.put_u8(self.param_len);
        buf.put_u8(self.param);
    }
}

/// Default-data write request. Goes out as `length + 2` bytes: mode, length, data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultDataWrite {
    pub mode: u8,
    pub length: u8,
    pub data: Vec<u8>,
}

impl DefaultDataWrite {
    /// Starts a write of block `mode` from what was last read back
    pub fn from_block(mode: u8, length: u8, current: &[u8]) -> DefaultDataWrite {
        let mut data = vec![0u8; length as usize];
        let n = current.len().min(data.len());
        data[..n].copy_from_slice(&current[..n]);
        DefaultDataWrite { mode, length, data }
    }
}

impl CommandParams for DefaultDataWrite {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.mode);
        buf.put_u8(self.length);
        let mut data = self.data.clone();
        data.resize(self.length as usize, 0);
        buf.put_slice(&data);
    }
}

/// Default-data block as read back: `[data_len, data..]`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultData {
    pub data: Vec<u8>,
}

impl DefaultData {
    /// Parses the block following the status byte
    pub fn parse(buf: &[u8]) -> Result<DefaultData> {
        ensure_len(buf, 1)?;
        let data_len = buf[0] as usize;
        if data_len > DEFAULT_DATA_SIZE {
            return Err(PacketError::OutOfRange { field: "data_len", value: data_len });
        }
        ensure_len(buf, 1 + data_len)?;
        Ok(DefaultData { data: buf[1..1 + data_len].to_vec() })
    }

    /// Byte at `offset`, 0 when the block was too short to carry it
    pub fn byte(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0)
    }
}

/// Offset of the SINR high blend entry
pub const BLEND_SINR_HI_OFFSET: usize = 5;
/// Offset of the RMSSI high blend entry
pub const BLEND_RMSSI_HI_OFFSET: usize = 6;

/// Stereo blend table, kept opaque apart from the entries the host edits
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlendTable {
    raw: Vec<u8>,
}

impl BlendTable {
    /// Parses the table following the status byte
    pub fn parse(buf: &[u8]) -> Result<BlendTable> {
        ensure_len(buf, BLEND_RMSSI_HI_OFFSET + 1)?;
        Ok(BlendTable { raw: buf.to_vec() })
    }

    /// SINR high threshold
    pub fn sinr_hi(&self) -> i8 {
        self.raw.get(BLEND_SINR_HI_OFFSET).map(|b| *b as i8).unwrap_or(0)
    }

    /// RMSSI high threshold
    pub fn rmssi_hi(&self) -> i8 {
        self.raw.get(BLEND_RMSSI_HI_OFFSET).map(|b| *b as i8).unwrap_or(0)
    }

    /// Replaces the SINR high threshold
    pub fn set_sinr_hi(&mut self, val: i8) {
        self.set(BLEND_SINR_HI_OFFSET, val as u8);
    }

    /// Replaces the RMSSI high threshold
    pub fn set_rmssi_hi(&mut self, val: i8) {
        self.set(BLEND_RMSSI_HI_OFFSET, val as u8);
    }

    fn set(&mut self, offset: usize, val: u8) {
        if self.raw.len() <= offset {
            self.raw.resize(offset + 1, 0);
        }
        self.raw[offset] = val;
    }
}

impl CommandParams for BlendTable {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_slice(&self.raw);
    }
}

/// Tune status as pushed with the tune event and as read back by the
/// station parameter command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TuneStatus {
    pub sub_event: u8,
    pub station_freq: i32,
    pub serv_avble: u8,
    pub rssi: i8,
    pub stereo_prg: u8,
    pub rds_sync_status: u8,
    pub mute_mode: u8,
    pub sinr: i8,
    pub intf_det_th: u8,
}

impl TuneStatus {
    /// Size on the wire
    pub const SIZE: usize = 12;

    /// Parses a full tune status, sub event included
    pub fn parse(mut buf: &[u8]) -> Result<TuneStatus> {
        ensure_len(buf, Self::SIZE)?;
        let sub_event = buf.get_u8();
        Self::parse_body(sub_event, buf)
    }

    /// Parses everything after the sub event, keeping `sub_event` as given
    pub fn parse_body(sub_event: u8, mut buf: &[u8]) -> Result<TuneStatus> {
        ensure_len(buf, Self::SIZE - 1)?;
        Ok(TuneStatus {
            sub_event,
            station_freq: buf.get_i32_le(),
            serv_avble: buf.get_u8(),
            rssi: buf.get_i8(),
            stereo_prg: buf.get_u8(),
            rds_sync_status: buf.get_u8(),
            mute_mode: buf.get_u8(),
            sinr: buf.get_i8(),
            intf_det_th: buf.get_u8(),
        })
    }
}

/// Station debug parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StationDbgParam {
    pub blend: u8,
    pub soft_mute: u8,
    pub inf_blend: u8,
    pub inf_soft_mute: u8,
    pub pilot_pil: u8,
    pub io_verc: u8,
    pub in_det_out: u8,
}

impl StationDbgParam {
    /// Size on the wire
    pub const SIZE: usize = 7;

    /// Parses the block following the status byte
    pub fn parse(mut buf: &[u8]) -> Result<StationDbgParam> {
        ensure_len(buf, Self::SIZE)?;
        Ok(StationDbgParam {
            blend: buf.get_u8(),
            soft_mute: buf.get_u8(),
            inf_blend: buf.get_u8(),
            inf_soft_mute: buf.get_u8(),
            pilot_pil: buf.get_u8(),
            io_verc: buf.get_u8(),
            in_det_out: buf.get_u8(),
        })
    }
}

/// Sub opcode selecting a memory read
pub const RIVA_PEEK_OPCODE: u8 = 0x0D;
/// Sub opcode selecting a memory write
pub const RIVA_POKE_OPCODE: u8 = 0x0C;
/// Largest memory access in one command
pub const MAX_RIVA_PEEK_RSP_SIZE: usize = 251;

/// Controller memory access header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RivaPeek {
    pub subopcode: u8,
    pub start_addr: u32,
    pub length: u8,
}

impl CommandParams for RivaPeek {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.subopcode);
        buf.put_u32_le(self.start_addr);
        buf.put_u8(self.length);
    }
}

/// Controller memory write: header followed by `length` data bytes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RivaPoke {
    pub cmd_params: RivaPeek,
    pub data: Vec<u8>,
}

impl CommandParams for RivaPoke {
    fn write_to(&self, buf: &mut Vec<u8>) {
        self.cmd_params.write_to(buf);
        let mut data = self.data.clone();
        data.resize(self.cmd_params.length as usize, 0);
        buf.put_slice(&data);
    }
}

/// SSBI register write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SsbiPoke {
    pub start_addr: u16,
    pub data: u8,
}

impl CommandParams for SsbiPoke {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.start_addr);
        buf.put_u8(self.data);
    }
}

/// SSBI register read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SsbiPeek {
    pub start_address: u16,
}

impl CommandParams for SsbiPeek {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.start_address);
    }
}

/// AGC set / get / reset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgcRequest {
    pub ucctrl: u8,
    pub ucgainstate: u8,
}

impl CommandParams for AgcRequest {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.ucctrl);
        buf.put_u8(self.ucgainstate);
    }
}

/// Frequency in kHz for the tune command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TuneStation {
    pub freq: i32,
}

impl CommandParams for TuneStation {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.freq);
    }
}

/// Single byte parameter shared by many commands (antenna, notch, masks..)
impl CommandParams for u8 {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u8(*self);
    }
}

/// Four byte word, used by the RDS group processing command
impl CommandParams for u32 {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(*self);
    }
}

/// Raw blocks (calibration data, spur tables) pass through untouched
impl CommandParams for [u8] {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.put_slice(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_conf_layout() {
        let conf = RecvConf {
            emphasis: 1,
            ch_spacing: 2,
            rds_std: 1,
            hlsi: 0,
            band_low_limit: 87500,
            band_high_limit: 108000,
        };
        let bytes = conf.to_bytes();
        assert_eq!(bytes.len(), RecvConf::SIZE);
        assert_eq!(&bytes[..4], &[1, 2, 1, 0]);
        assert_eq!(&bytes[4..8], &87500i32.to_le_bytes());
        assert_eq!(RecvConf::parse(&bytes).unwrap(), conf);
        assert!(RecvConf::parse(&bytes[..11]).is_err());
    }

    #[test]
    fn rds_search_embeds_plain_search() {
        let req = SearchRdsStation {
            srch_station: SearchStation { srch_mode: 2, scan_time: 3, srch_dir: 1 },
            srch_pty: 10,
            srch_pi: 0xC0DE,
        };
        assert_eq!(req.to_bytes(), vec![2, 3, 1, 10, 0xDE, 0xC0]);
    }

    #[test]
    fn default_data_write_is_length_plus_two() {
        let wr = DefaultDataWrite::from_block(FM_AFJUMP_CONFG_MODE, FM_AFJUMP_CNFG_LEN, &[9, 8]);
        let bytes = wr.to_bytes();
        assert_eq!(bytes.len(), FM_AFJUMP_CNFG_LEN as usize + 2);
        assert_eq!(&bytes[..4], &[FM_AFJUMP_CONFG_MODE, FM_AFJUMP_CNFG_LEN, 9, 8]);
    }

    #[test]
    fn default_data_respects_declared_length() {
        let dd = DefaultData::parse(&[3, 0xA, 0xB, 0xC, 0xD]).unwrap();
        assert_eq!(dd.data, vec![0xA, 0xB, 0xC]);
        assert_eq!(dd.byte(7), 0);
        assert!(DefaultData::parse(&[4, 1, 2]).is_err());
    }

    #[test]
    fn blend_table_edits_in_place() {
        let mut tbl = BlendTable::parse(&[0, 1, 2, 3, 4, 0xF6, 20, 7]).unwrap();
        assert_eq!(tbl.sinr_hi(), -10);
        assert_eq!(tbl.rmssi_hi(), 20);
        tbl.set_rmssi_hi(-5);
        assert_eq!(tbl.to_bytes(), vec![0, 1, 2, 3, 4, 0xF6, 0xFB, 7]);
    }

    #[test]
    fn tune_status_layout() {
        let mut raw = vec![0x01];
        raw.extend_from_slice(&98100i32.to_le_bytes());
        raw.extend_from_slice(&[1, 0xE2, 1, 1, 0, 12, 3]);
        let st = TuneStatus::parse(&raw).unwrap();
        assert_eq!(st.station_freq, 98100);
        assert_eq!(st.rssi, -30);
        assert_eq!(st.sinr, 12);
        assert_eq!(TuneStatus::parse_body(7, &raw[1..]).unwrap().sub_event, 7);
    }

    #[test]
    fn poke_pads_to_length() {
        let poke = RivaPoke {
            cmd_params: RivaPeek { subopcode: RIVA_POKE_OPCODE, start_addr: 0x10, length: 3 },
            data: vec![0xAA],
        };
        assert_eq!(poke.to_bytes(), vec![RIVA_POKE_OPCODE, 0x10, 0, 0, 0, 3, 0xAA, 0, 0]);
    }
}
