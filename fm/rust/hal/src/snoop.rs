//! FM HCI snoop logger
//!
//! Wraps a transport factory so every command going down and every event
//! coming up is logged according to `persist.vendor.fm.snooplogmode`.

use crate::{EventSink, FmHciTransport, HalError, TransportFactory};
use bytes::Bytes;
use fm_common::sys_prop;
use fm_packet::{CommandPacket, EventCode, HciPacketHeaderSize};
use log::debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// The different modes snoop logging can be in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnoopMode {
    /// All logs disabled
    Disabled,
    /// Headers only, RDS payloads withheld
    Filtered,
    /// Log everything
    Full,
}

/// There was an error parsing the mode from a string
#[derive(Debug)]
pub struct SnoopModeParseError;

impl std::str::FromStr for SnoopMode {
    type Err = SnoopModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(SnoopMode::Disabled),
            "filtered" => Ok(SnoopMode::Filtered),
            "full" => Ok(SnoopMode::Full),
            _ => Err(SnoopModeParseError),
        }
    }
}

/// All snoop logging config
#[derive(Clone, Debug)]
pub struct SnoopConfig {
    max_packets: u32,
    mode: SnoopMode,
}

impl SnoopConfig {
    /// Constructs a new snoop config from system properties
    pub fn new() -> Self {
        Self {
            max_packets: sys_prop::get_u32("persist.vendor.fm.snoopsize").unwrap_or(0xFFFF),
            mode: get_configured_snoop_mode().parse().unwrap_or(SnoopMode::Disabled),
        }
    }

    /// Overwrites the loaded mode with the provided one
    pub fn set_mode(&mut self, value: SnoopMode) {
        self.mode = value;
    }

    /// Overwrites the per-session packet cap
    pub fn set_max_packets(&mut self, value: u32) {
        self.max_packets = value;
    }

    /// Mode in effect
    pub fn mode(&self) -> SnoopMode {
        self.mode
    }
}

impl Default for SnoopConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn get_configured_snoop_mode() -> String {
    sys_prop::get("persist.vendor.fm.snooplogmode").unwrap_or(if sys_prop::get_debuggable() {
        sys_prop::get("persist.vendor.fm.snoopdefaultmode").unwrap_or_default()
    } else {
        String::default()
    })
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Up,
    Down,
}

struct SnoopLogger {
    config: SnoopConfig,
    logged: AtomicU32,
}

impl SnoopLogger {
    fn new(config: SnoopConfig) -> Self {
        Self { config, logged: AtomicU32::new(0) }
    }

    /// Returns what would be logged, None when the packet is suppressed
    fn render(&self, dir: Direction, bytes: &[u8]) -> Option<String> {
        if self.config.mode == SnoopMode::Disabled {
            return None;
        }
        if self.logged.fetch_add(1, Ordering::Relaxed) >= self.config.max_packets {
            return None;
        }
        let header_len = match dir {
            Direction::Down => HciPacketHeaderSize::Command as usize,
            Direction::Up => HciPacketHeaderSize::Event as usize,
        };
        let header = &bytes[..header_len.min(bytes.len())];
        let body = &bytes[header.len()..];
        let withhold = self.config.mode == SnoopMode::Filtered && dir_carries_rds(dir, bytes);
        if withhold {
            Some(format!("{:?} {:02x?} <{} bytes filtered>", dir, header, body.len()))
        } else {
            Some(format!("{:?} {:02x?} {:02x?}", dir, header, body))
        }
    }

    fn log(&self, dir: Direction, bytes: &[u8]) {
        if let Some(line) = self.render(dir, bytes) {
            debug!("snoop: {}", line);
        }
    }
}

fn dir_carries_rds(dir: Direction, bytes: &[u8]) -> bool {
    match dir {
        Direction::Down => false,
        Direction::Up => matches!(
            bytes.first().and_then(|code| EventCode::from_wire(*code)),
            Some(EventCode::RdsRxData)
                | Some(EventCode::ProgramService)
                | Some(EventCode::RadioText)
                | Some(EventCode::RadioTextPlusTag)
                | Some(EventCode::ERadioText)
                | Some(EventCode::DriverRdsEvent)
        ),
    }
}

/// Transport factory decorator that snoops on everything passing through
pub struct SnoopedHal<F: TransportFactory> {
    inner: F,
    config: SnoopConfig,
}

impl<F: TransportFactory> SnoopedHal<F> {
    /// Wraps `inner`, logging per `config`
    pub fn new(inner: F, config: SnoopConfig) -> Self {
        Self { inner, config }
    }
}

impl<F: TransportFactory> TransportFactory for SnoopedHal<F> {
    fn init(
        &self,
        sink: Arc<dyn EventSink>,
        rt: Arc<Runtime>,
    ) -> Result<Arc<dyn FmHciTransport>, HalError> {
        let logger = Arc::new(SnoopLogger::new(self.config.clone()));
        let sink = Arc::new(SnoopedSink { inner: sink, logger: logger.clone() });
        let transport = self.inner.init(sink, rt)?;
        Ok(Arc::new(SnoopedTransport { inner: transport, logger }))
    }
}

struct SnoopedSink {
    inner: Arc<dyn EventSink>,
    logger: Arc<SnoopLogger>,
}

impl EventSink for SnoopedSink {
    fn process_event(&self, evt: Bytes) {
        self.logger.log(Direction::Up, &evt);
        self.inner.process_event(evt);
    }

    fn close_done(&self) {
        self.inner.close_done();
    }
}

struct SnoopedTransport {
    inner: Arc<dyn FmHciTransport>,
    logger: Arc<SnoopLogger>,
}

impl FmHciTransport for SnoopedTransport {
    fn transmit(&self, cmd: CommandPacket) -> Result<(), HalError> {
        self.logger.log(Direction::Down, cmd.as_bytes());
        self.inner.transmit(cmd)
    }

    fn close(&self) {
        self.inner.close();
    }
}
