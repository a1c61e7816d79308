//! Correlation of outstanding commands with their command-complete events.
//!
//! Every tracked command leaves a `PendingRequest` queued under its opcode.
//! The controller answers in order, so the oldest queued request for an
//! opcode is the one a command-complete belongs to.

use crate::lock;
use crate::radio::Staged;
use fm_packet::OpCode;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Channel detection threshold fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChDetField {
    SinrThreshold = 1,
    SinrSamples = 2,
    IntfLow = 3,
    IntfHigh = 4,
}

/// Default data fields, spread over three blocks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultDataField {
    AfRmssiTh = 0,
    AfRmssiSamples = 1,
    GdChRmssiTh = 2,
    SearchAlgo = 3,
    SinrFirstStage = 4,
    RmssiFirstStage = 5,
    Cf0Th12 = 6,
    TunePower = 7,
    RepeatCount = 8,
    AfAlgo = 9,
    AfSinrGdChTh = 10,
    AfSinrTh = 11,
}

/// Blend table fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendField {
    SinrHi = 1,
    RmssiHi = 2,
}

/// Station parameter fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StationField {
    Rssi = 0,
    Sinr = 1,
}

/// Station debug parameter fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StationDbgField {
    IoverC = 0,
    InfDetOut = 1,
}

/// Response families that carry several fields at once
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldCategory {
    ChDet,
    DefaultData,
    Blend,
    Station,
    StationDbg,
}

/// The one field a read is interested in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedField {
    ChDet(ChDetField),
    DefaultData(DefaultDataField),
    Blend(BlendField),
    Station(StationField),
    StationDbg(StationDbgField),
}

impl ExpectedField {
    /// Family the field belongs to
    pub fn category(&self) -> FieldCategory {
        match self {
            ExpectedField::ChDet(_) => FieldCategory::ChDet,
            ExpectedField::DefaultData(_) => FieldCategory::DefaultData,
            ExpectedField::Blend(_) => FieldCategory::Blend,
            ExpectedField::Station(_) => FieldCategory::Station,
            ExpectedField::StationDbg(_) => FieldCategory::StationDbg,
        }
    }

    /// Bit of the field in its family's mask
    pub fn bit(&self) -> u32 {
        let pos = match *self {
            ExpectedField::ChDet(f) => f as u32,
            ExpectedField::DefaultData(f) => f as u32,
            ExpectedField::Blend(f) => f as u32,
            ExpectedField::Station(f) => f as u32,
            ExpectedField::StationDbg(f) => f as u32,
        };
        1 << pos
    }
}

/// What the response handler should do with the payload
#[derive(Debug)]
pub enum Expect {
    /// Status only
    Status,
    /// Extract one field of a multi-field response
    Read(ExpectedField),
    /// Refresh the cached block, nothing to extract
    Refresh,
    /// Settle a configuration write
    Commit(Staged),
}

/// Outcome delivered to a blocked caller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub status: u8,
    pub value: i32,
}

/// Where the outcome goes
#[derive(Debug)]
pub enum Reply {
    /// Through the matching `FmHalCallbacks` method
    Callback,
    /// To a caller blocked on the other end
    Waiter(oneshot::Sender<Completion>),
    /// Nowhere
    Silent,
}

/// One outstanding command
#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub expect: Expect,
    pub reply: Reply,
    /// Its caller gave up waiting
    pub detached: bool,
}

impl PendingRequest {
    /// Stand-in for a response nobody is waiting for
    pub fn unsolicited() -> Self {
        PendingRequest { id: 0, expect: Expect::Status, reply: Reply::Silent, detached: false }
    }

    /// Wakes the waiter, if any. Returns true when the caller should be
    /// notified through callbacks instead.
    pub fn complete(self, status: u8, value: i32) -> bool {
        match self.reply {
            Reply::Callback => true,
            Reply::Waiter(tx) => {
                if tx.send(Completion { status, value }).is_err() {
                    warn!("waiter for request {} already gone", self.id);
                }
                false
            }
            Reply::Silent => false,
        }
    }

    /// Field this request reads, if it is a read
    pub fn field(&self) -> Option<ExpectedField> {
        match self.expect {
            Expect::Read(field) => Some(field),
            _ => None,
        }
    }
}

/// Outstanding commands, oldest first per opcode
#[derive(Default)]
pub struct PendingTable {
    next_id: AtomicU64,
    queues: Mutex<HashMap<OpCode, VecDeque<PendingRequest>>>,
}

impl PendingTable {
    /// Queues a request for `opcode`, returning its id. Detached requests
    /// for the same opcode are dropped first, so a response that never came
    /// cannot shift every later answer by one.
    pub fn register(&self, opcode: OpCode, expect: Expect, reply: Reply) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut queues = lock(&self.queues);
        let queue = queues.entry(opcode).or_default();
        let before = queue.len();
        queue.retain(|req| !req.detached);
        if queue.len() != before {
            debug!("dropped {} stale {:?} requests", before - queue.len(), opcode);
        }
        queue.push_back(PendingRequest { id, expect, reply, detached: false });
        id
    }

    /// Oldest request for `opcode`
    pub fn take(&self, opcode: OpCode) -> Option<PendingRequest> {
        let mut queues = lock(&self.queues);
        let queue = queues.get_mut(&opcode)?;
        let req = queue.pop_front();
        if queue.is_empty() {
            queues.remove(&opcode);
        }
        req
    }

    /// Removes a request whose command never made it out
    pub fn withdraw(&self, opcode: OpCode, id: u64) -> Option<PendingRequest> {
        let mut queues = lock(&self.queues);
        let queue = queues.get_mut(&opcode)?;
        let pos = queue.iter().position(|req| req.id == id)?;
        let req = queue.remove(pos);
        if queue.is_empty() {
            queues.remove(&opcode);
        }
        req
    }

    /// Stops replying to a request that is still in flight. It keeps its
    /// place until the next request for the opcode is queued, so a late
    /// response arriving before then is absorbed silently.
    pub fn detach(&self, opcode: OpCode, id: u64) -> bool {
        let mut queues = lock(&self.queues);
        match queues.get_mut(&opcode).and_then(|q| q.iter_mut().find(|req| req.id == id)) {
            Some(req) => {
                req.reply = Reply::Silent;
                req.detached = true;
                true
            }
            None => false,
        }
    }

    /// OR of the field bits of every queued read in `category`
    pub fn mask(&self, category: FieldCategory) -> u32 {
        lock(&self.queues)
            .values()
            .flatten()
            .filter_map(PendingRequest::field)
            .filter(|field| field.category() == category)
            .fold(0, |mask, field| mask | field.bit())
    }

    /// Empties the table. Dropping the result wakes every waiter with an error.
    pub fn drain(&self) -> Vec<PendingRequest> {
        lock(&self.queues).drain().flat_map(|(_, queue)| queue).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_go_to_the_oldest_request() {
        let table = PendingTable::default();
        let first = table.register(OpCode::GetChDetThreshold, Expect::Refresh, Reply::Silent);
        let second = table.register(OpCode::GetChDetThreshold, Expect::Refresh, Reply::Silent);
        assert_eq!(table.take(OpCode::GetChDetThreshold).unwrap().id, first);
        assert_eq!(table.take(OpCode::GetChDetThreshold).unwrap().id, second);
        assert!(table.take(OpCode::GetChDetThreshold).is_none());
    }

    #[test]
    fn mask_tracks_queued_fields() {
        let table = PendingTable::default();
        let sinr = ExpectedField::ChDet(ChDetField::SinrThreshold);
        let low = ExpectedField::ChDet(ChDetField::IntfLow);
        let id = table.register(OpCode::GetChDetThreshold, Expect::Read(sinr), Reply::Callback);
        table.register(OpCode::GetChDetThreshold, Expect::Read(low), Reply::Callback);
        table.register(
            OpCode::GetBlendTable,
            Expect::Read(ExpectedField::Blend(BlendField::SinrHi)),
            Reply::Callback,
        );

        assert_eq!(table.mask(FieldCategory::ChDet), sinr.bit() | low.bit());
        assert_eq!(table.mask(FieldCategory::Blend), 1 << 1);
        assert_eq!(table.mask(FieldCategory::Station), 0);

        table.withdraw(OpCode::GetChDetThreshold, id).unwrap();
        assert_eq!(table.mask(FieldCategory::ChDet), low.bit());
        table.take(OpCode::GetChDetThreshold).unwrap();
        assert_eq!(table.mask(FieldCategory::ChDet), 0);
    }

    #[test]
    fn detached_requests_absorb_late_answers() {
        let table = PendingTable::default();
        let (tx, mut rx) = oneshot::channel();
        let id = table.register(OpCode::GetBlendTable, Expect::Refresh, Reply::Waiter(tx));

        assert!(table.detach(OpCode::GetBlendTable, id));
        // the sender went away with the detached reply
        assert!(rx.try_recv().is_err());
        let late = table.take(OpCode::GetBlendTable).unwrap();
        assert_eq!(late.id, id);
        assert!(!late.complete(0, 1));
    }

    #[test]
    fn new_requests_drop_detached_ones() {
        let table = PendingTable::default();
        let stale = table.register(OpCode::GetBlendTable, Expect::Refresh, Reply::Silent);
        let other = table.register(OpCode::GetChDetThreshold, Expect::Refresh, Reply::Silent);
        assert!(table.detach(OpCode::GetBlendTable, stale));
        assert!(table.detach(OpCode::GetChDetThreshold, other));

        let fresh = table.register(OpCode::GetBlendTable, Expect::Refresh, Reply::Callback);
        assert_eq!(table.take(OpCode::GetBlendTable).unwrap().id, fresh);
        assert!(table.take(OpCode::GetBlendTable).is_none());
        // other opcodes keep theirs
        assert_eq!(table.take(OpCode::GetChDetThreshold).unwrap().id, other);
    }

    #[test]
    fn drain_wakes_waiters() {
        let table = PendingTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.register(OpCode::DefaultDataRead, Expect::Refresh, Reply::Waiter(tx));
        assert_eq!(table.drain().len(), 1);
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
    }
}
