//! Reassembly of Open Data Application payloads out of raw RDS groups.
//!
//! Plain RDS (PS, RT, AF) arrives pre-assembled in its own events. Only the
//! ODA carried text (eRT) has to be put back together here, two bytes per
//! block, from the groups the controller forwards verbatim.

use crate::callbacks::ErtText;
use fm_packet::error::{ensure_len, Result};
use log::{debug, info};

/// Offset of the first block in a raw RDS event
pub const RDSGRP_DATA_OFFSET: usize = 0x01;
/// Blocks in an RDS group
pub const RDS_BLOCKS_NUM: usize = 4;
/// Group type code of group 3A, which announces ODA carriers
pub const GRP_3A: u8 = 0x06;
/// Application id of Enhanced Radio Text
pub const ERT_AID: u16 = 0x6552;
/// Application id of Radio Text Plus
pub const RT_PLUS_AID: u16 = 0x4BD7;
/// Last byte-pair index of an eRT message
pub const MAX_ERT_SEGMENT: u8 = 31;
/// Formatting direction bit of the eRT ODA message
pub const ERT_FORMAT_DIR_BIT: u8 = 1;
/// RT/eRT flag bit of the RT+ ODA message
pub const RT_ERT_FLAG_BIT: u8 = 5;
/// eRT end of message
pub const CARRIAGE_RETURN: u16 = 0x000D;

const ERT_BUF_SIZE: usize = 256;

/// One block of an RDS group
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RdsBlock {
    pub lsb: u8,
    pub msb: u8,
}

impl RdsBlock {
    fn word(&self) -> u16 {
        u16::from(self.lsb) | (u16::from(self.msb) << 8)
    }
}

/// A raw RDS group as forwarded by the controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RdsGroup {
    pub blocks: [RdsBlock; RDS_BLOCKS_NUM],
}

impl RdsGroup {
    /// Parses the parameters of a raw RDS data event
    pub fn parse(buf: &[u8]) -> Result<RdsGroup> {
        ensure_len(buf, RDSGRP_DATA_OFFSET + 2 * RDS_BLOCKS_NUM)?;
        let mut group = RdsGroup::default();
        for (n, block) in group.blocks.iter_mut().enumerate() {
            let at = RDSGRP_DATA_OFFSET + 2 * n;
            *block = RdsBlock { lsb: buf[at], msb: buf[at + 1] };
        }
        Ok(group)
    }

    /// Group type code, version bit included
    pub fn gtc(&self) -> u8 {
        self.blocks[1].msb >> 3
    }

    /// Application group type, also the eRT byte-pair index
    pub fn agt(&self) -> u8 {
        self.blocks[1].lsb & 0x1F
    }

    /// Application id of a 3A group
    pub fn aid(&self) -> u16 {
        self.blocks[3].word()
    }
}

/// What a fed group produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RdsOutput {
    /// An eRT or RT+ carrier was assigned a new group type
    OdaRegistered,
    /// A complete eRT message
    Ert(ErtText),
}

/// Carrier tracking and eRT accumulation for one RDS stream
#[derive(Debug)]
pub struct RdsReassembler {
    oda_agt: u32,
    rt_plus_carrier: i32,
    ert_carrier: i32,
    ert_buf: Vec<u8>,
    c_byt_pair_index: u8,
    utf_8_flag: bool,
    formatting_dir: bool,
    rt_ert_flag: bool,
}

impl Default for RdsReassembler {
    fn default() -> Self {
        Self {
            oda_agt: 0,
            rt_plus_carrier: -1,
            ert_carrier: -1,
            ert_buf: Vec::with_capacity(ERT_BUF_SIZE),
            c_byt_pair_index: 0,
            utf_8_flag: false,
            formatting_dir: false,
            rt_ert_flag: false,
        }
    }
}

impl RdsReassembler {
    /// Group mask bit of the last announced carrier, 0 when none
    pub fn oda_agt(&self) -> u32 {
        self.oda_agt
    }

    /// Whether RT+ tags refer to eRT rather than RT
    pub fn rt_ert_flag(&self) -> bool {
        self.rt_ert_flag
    }

    /// Bytes of the eRT message collected so far
    pub fn ert_len(&self) -> usize {
        self.ert_buf.len()
    }

    /// Feeds the next group of the stream
    pub fn feed(&mut self, group: &RdsGroup) -> Option<RdsOutput> {
        let gtc = group.gtc();
        let agt = group.agt();

        if gtc == GRP_3A {
            return self.register_oda(group, agt);
        }

        let carrier = i32::from(gtc);
        if carrier == self.rt_plus_carrier {
            // RT+ tags come up decoded in their own event
            None
        } else if carrier == self.ert_carrier {
            self.buffer_ert(group, agt)
        } else {
            None
        }
    }

    fn register_oda(&mut self, group: &RdsGroup, agt: u8) -> Option<RdsOutput> {
        // bit position in the group mask: 0A, 0B, 1A, 1B, 2A ...
        let mask_bit = ((agt >> 1) << 1) + (agt & 1);
        let agt = i32::from(agt);
        match group.aid() {
            ERT_AID => {
                self.oda_agt = 1 << mask_bit;
                self.utf_8_flag = group.blocks[2].lsb & 1 != 0;
                self.formatting_dir = (group.blocks[2].lsb >> ERT_FORMAT_DIR_BIT) & 1 != 0;
                let changed = self.ert_carrier != agt;
                self.ert_carrier = agt;
                if changed {
                    info!("eRT carried on group type {}", agt);
                    return Some(RdsOutput::OdaRegistered);
                }
            }
            RT_PLUS_AID => {
                self.oda_agt = 1 << mask_bit;
                self.rt_ert_flag = (group.blocks[2].msb >> RT_ERT_FLAG_BIT) & 1 != 0;
                let changed = self.rt_plus_carrier != agt;
                self.rt_plus_carrier = agt;
                if changed {
                    info!("RT+ carried on group type {}", agt);
                    return Some(RdsOutput::OdaRegistered);
                }
            }
            aid => {
                debug!("ignoring ODA {:#06x}", aid);
                self.oda_agt = 0;
            }
        }
        None
    }

    fn buffer_ert(&mut self, group: &RdsGroup, byte_pair_index: u8) -> Option<RdsOutput> {
        if byte_pair_index == 0 {
            self.reset_ert();
        }
        if self.c_byt_pair_index != byte_pair_index {
            debug!("eRT segment {} out of order, expected {}", byte_pair_index, self.c_byt_pair_index);
            self.reset_ert();
            return None;
        }
        self.c_byt_pair_index += 1;

        let mut terminated = false;
        for block in &group.blocks[2..] {
            self.ert_buf.push(block.msb);
            self.ert_buf.push(block.lsb);
            let cut = if !self.utf_8_flag && block.word() == CARRIAGE_RETURN {
                2
            } else if self.utf_8_flag && u16::from(block.msb) == CARRIAGE_RETURN {
                2
            } else if self.utf_8_flag && u16::from(block.lsb) == CARRIAGE_RETURN {
                1
            } else {
                0
            };
            if cut > 0 {
                self.ert_buf.truncate(self.ert_buf.len() - cut);
                terminated = true;
                break;
            }
        }

        if byte_pair_index == MAX_ERT_SEGMENT || terminated {
            let text = std::mem::take(&mut self.ert_buf);
            self.reset_ert();
            if !text.is_empty() {
                return Some(RdsOutput::Ert(ErtText {
                    utf8: self.utf_8_flag,
                    formatting_dir: self.formatting_dir,
                    text,
                }));
            }
        }
        None
    }

    fn reset_ert(&mut self) {
        self.c_byt_pair_index = 0;
        self.ert_buf.clear();
    }
}
