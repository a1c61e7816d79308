//! FM HCI Hardware Abstraction Layer
//! Carries FM HCI commands to the controller and delivers
//! its events back to the protocol engine

pub mod snoop;
pub mod socket_hal;

use bytes::Bytes;
use fm_packet::CommandPacket;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;

/// H4 packet header size
const H4_HEADER_SIZE: usize = 1;

/// Receives everything the transport pulls off the wire.
/// Called from the transport's delivery context, one event at a time, in arrival order.
pub trait EventSink: Send + Sync {
    /// A complete event packet, header included
    fn process_event(&self, evt: Bytes);
    /// The transport finished tearing down after `close`
    fn close_done(&self);
}

/// Outbound half of a live transport session
pub trait FmHciTransport: Send + Sync {
    /// Queues a framed command for the controller
    fn transmit(&self, cmd: CommandPacket) -> Result<(), HalError>;
    /// Starts teardown. `EventSink::close_done` follows once it completes.
    fn close(&self);
}

/// Opens transport sessions
pub trait TransportFactory {
    /// Brings the transport up and binds it to `sink`
    fn init(
        &self,
        sink: Arc<dyn EventSink>,
        rt: Arc<Runtime>,
    ) -> Result<Arc<dyn FmHciTransport>, HalError>;
}

/// Errors that can be encountered while dealing with the HAL
#[derive(Error, Debug)]
pub enum HalError {
    /// Invalid simulator host
    #[error("Invalid controller address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),
    /// Error while connecting to the controller
    #[error("Connection to controller failed: {0}")]
    Connect(#[from] std::io::Error),
    /// The session is already closed
    #[error("Transport closed")]
    Closed,
}
