//! Socket HAL
//! This connects to an FM controller simulator over TCP, using the
//! H4 style one byte packet type prefix on both directions.

use bytes::{BufMut, BytesMut};
use log::{error, info, warn};
use std::convert::TryFrom;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::select;
use tokio::sync::{mpsc, oneshot};

use fm_common::sys_prop;
use fm_packet::{CommandPacket, HciPacketHeaderSize, HciPacketType};

use crate::{EventSink, FmHciTransport, HalError, TransportFactory, H4_HEADER_SIZE};

/// Default simulator port
pub const DEFAULT_PORT: u16 = 6411;

/// Socket HAL configuration
#[derive(Clone, Debug)]
pub struct SocketConfig {
    port: u16,
    server_address: String,
}

impl SocketConfig {
    /// Create a socket config
    pub fn new(port: u16, server_address: &str) -> Self {
        Self { port, server_address: String::from(server_address) }
    }

    /// Reads `persist.vendor.fm.sim_port` and `persist.vendor.fm.sim_host`
    pub fn from_sys_props() -> Self {
        let port = sys_prop::get_u32("persist.vendor.fm.sim_port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);
        let host = sys_prop::get("persist.vendor.fm.sim_host").unwrap_or_else(|| "127.0.0.1".into());
        Self::new(port, &host)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, "127.0.0.1")
    }
}

/// Socket HAL
pub struct SocketHal {
    config: SocketConfig,
}

impl SocketHal {
    /// Socket HAL talking to the simulator named by `config`
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }

    /// Send events received from the controller to the engine
    async fn dispatch_incoming<R>(sink: Arc<dyn EventSink>, reader: R) -> Result<(), HalError>
    where
        R: AsyncReadExt + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let header_size = H4_HEADER_SIZE + HciPacketHeaderSize::Event as usize;
        loop {
            let mut header = BytesMut::with_capacity(258);
            header.resize(header_size, 0);
            reader.read_exact(&mut header).await?;
            let param_len: usize = header[2].into();
            let mut payload = header.split_off(header_size);
            payload.resize(param_len, 0);
            reader.read_exact(&mut payload).await?;
            let h4_type = header.split_to(H4_HEADER_SIZE);
            header.unsplit(payload);
            if h4_type[0] == HciPacketType::Event as u8 {
                sink.process_event(header.freeze());
            } else {
                warn!("dropping packet of type {:#04x}", h4_type[0]);
            }
        }
    }

    /// Send commands received from the engine to the controller
    async fn dispatch_outgoing<W>(
        mut cmd_rx: mpsc::UnboundedReceiver<CommandPacket>,
        mut writer: W,
    ) -> Result<(), HalError>
    where
        W: AsyncWriteExt + Unpin,
    {
        while let Some(next_cmd) = cmd_rx.recv().await {
            let mut command = BytesMut::with_capacity(next_cmd.len() + H4_HEADER_SIZE);
            command.put_u8(HciPacketType::Command as u8);
            command.extend_from_slice(next_cmd.as_bytes());
            writer.write_all(&command[..]).await?;
        }
        Ok(())
    }
}

impl TransportFactory for SocketHal {
    /// Connect to the simulator and spawn the task that pumps both directions
    fn init(
        &self,
        sink: Arc<dyn EventSink>,
        rt: Arc<Runtime>,
    ) -> Result<Arc<dyn FmHciTransport>, HalError> {
        let ipaddr = IpAddr::from_str(&self.config.server_address)?;
        let socket_addr = SocketAddr::new(ipaddr, self.config.port);
        let stream = rt.block_on(TcpStream::connect(&socket_addr))?;
        let (reader, writer) = stream.into_split();
        info!("connected to FM controller at {}", socket_addr);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        rt.spawn(async move {
            select! {
                res = Self::dispatch_incoming(sink.clone(), reader) => {
                    if let Err(e) = res {
                        error!("event reader stopped: {}", e);
                    }
                },
                res = Self::dispatch_outgoing(cmd_rx, writer) => {
                    if let Err(e) = res {
                        error!("command writer stopped: {}", e);
                    }
                },
                _ = shutdown_rx => info!("transport close requested"),
            }
            sink.close_done();
        });

        Ok(Arc::new(SocketTransport { cmd_tx, shutdown: Mutex::new(Some(shutdown_tx)) }))
    }
}

/// Live socket session
pub struct SocketTransport {
    cmd_tx: mpsc::UnboundedSender<CommandPacket>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl FmHciTransport for SocketTransport {
    fn transmit(&self, cmd: CommandPacket) -> Result<(), HalError> {
        self.cmd_tx.send(cmd).map_err(|_| HalError::Closed)
    }

    fn close(&self) {
        let shutdown = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = shutdown {
            // the pump may already be gone, in which case close_done has run
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    enum Seen {
        Event(Bytes),
        Closed,
    }

    struct ChannelSink {
        tx: Mutex<std_mpsc::Sender<Seen>>,
    }

    impl EventSink for ChannelSink {
        fn process_event(&self, evt: Bytes) {
            self.tx.lock().unwrap().send(Seen::Event(evt)).unwrap();
        }

        fn close_done(&self) {
            self.tx.lock().unwrap().send(Seen::Closed).unwrap();
        }
    }

    #[test]
    fn frames_commands_and_events() {
        let rt = Arc::new(Runtime::new().unwrap());
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();

        let (wire_tx, wire_rx) = std_mpsc::channel();
        rt.spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut cmd = [0u8; 6];
            sock.read_exact(&mut cmd).await.unwrap();
            wire_tx.send(cmd.to_vec()).unwrap();
            // H4 event prefix, stereo status event, stereo on
            sock.write_all(&[0x04, 0x03, 0x01, 0x01]).await.unwrap();
            // keep the socket open until the host closes
            let mut rest = Vec::new();
            let _ = sock.read_to_end(&mut rest).await;
        });

        let (tx, rx) = std_mpsc::channel();
        let sink = Arc::new(ChannelSink { tx: Mutex::new(tx) });
        let hal = SocketHal::new(SocketConfig::new(port, "127.0.0.1"));
        let transport = hal.init(sink, rt.clone()).unwrap();

        transport.transmit(CommandPacket::build(0x4C07, &[0x01, 0x02]).unwrap()).unwrap();
        let wire = wire_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(wire, vec![0x01, 0x07, 0x4C, 0x02, 0x01, 0x02]);

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Seen::Event(evt) => assert_eq!(&evt[..], &[0x03, 0x01, 0x01]),
            Seen::Closed => panic!("closed before the event arrived"),
        }

        transport.close();
        assert!(matches!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Seen::Closed));
        assert!(matches!(
            transport.transmit(CommandPacket::build(0x4C02, &[]).unwrap()),
            Err(HalError::Closed)
        ));
    }

    #[test]
    fn bad_address_is_rejected() {
        let rt = Arc::new(Runtime::new().unwrap());
        let (tx, _rx) = std_mpsc::channel();
        let sink = Arc::new(ChannelSink { tx: Mutex::new(tx) });
        let hal = SocketHal::new(SocketConfig::new(1, "not-an-ip"));
        assert!(matches!(hal.init(sink, rt), Err(HalError::InvalidAddress(_))));
    }
}
