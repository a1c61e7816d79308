//! Session lifecycle: at most one live session per process, opened by
//! `hal_init` and torn down through the transport's close-done notification.

use crate::callbacks::{FmHalCallbacks, ThreadEvent};
use crate::config::FmConfig;
use crate::error::{FmError, Result};
use crate::lock;
use crate::pending::PendingTable;
use crate::radio::RadioState;
use crate::rds::RdsReassembler;
use crate::responses::ResponseTable;
use bytes::Bytes;
use fm_hal::{EventSink, FmHciTransport, TransportFactory};
use fm_packet::EventPacket;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Runtime;

/// One radio session, bound to one transport session
pub struct FmHal {
    pub(crate) rt: Arc<Runtime>,
    pub(crate) config: FmConfig,
    callbacks: Arc<dyn FmHalCallbacks>,
    transport: Mutex<Option<Arc<dyn FmHciTransport>>>,
    state: Mutex<RadioState>,
    rds: Mutex<RdsReassembler>,
    pending: PendingTable,
    responses: ResponseTable,
    closing: AtomicBool,
    closed: AtomicBool,
    /// Serializes control operations, one at a time per session
    pub(crate) ctrl_lock: Mutex<()>,
    slot: Arc<SessionSlot>,
}

impl FmHal {
    fn new(
        rt: Arc<Runtime>,
        config: FmConfig,
        callbacks: Arc<dyn FmHalCallbacks>,
        slot: Arc<SessionSlot>,
    ) -> Self {
        FmHal {
            rt,
            config,
            callbacks,
            transport: Mutex::new(None),
            state: Mutex::new(RadioState::default()),
            rds: Mutex::new(RdsReassembler::default()),
            pending: PendingTable::default(),
            responses: ResponseTable::new(),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ctrl_lock: Mutex::new(()),
            slot,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, RadioState> {
        lock(&self.state)
    }

    pub(crate) fn rds(&self) -> MutexGuard<'_, RdsReassembler> {
        lock(&self.rds)
    }

    pub(crate) fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub(crate) fn responses(&self) -> &ResponseTable {
        &self.responses
    }

    pub(crate) fn callbacks(&self) -> &dyn FmHalCallbacks {
        self.callbacks.as_ref()
    }

    /// Live transport, None once the session started closing
    pub(crate) fn transport(&self) -> Option<Arc<dyn FmHciTransport>> {
        if self.is_closing() {
            return None;
        }
        lock(&self.transport).clone()
    }

    /// True from the first close request on
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// True once the transport confirmed the close
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Asks the transport to close. Later calls are no-ops.
    pub(crate) fn begin_close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            debug!("close already requested");
            return;
        }
        let transport = lock(&self.transport).clone();
        match transport {
            Some(transport) => {
                info!("closing transport");
                transport.close();
            }
            None => warn!("close requested with no transport"),
        }
    }
}

impl EventSink for FmHal {
    fn process_event(&self, evt: Bytes) {
        if self.is_closing() {
            debug!("session closing, dropping event");
            return;
        }
        match EventPacket::parse(evt) {
            Ok(evt) => self.dispatch_event(&evt),
            Err(e) => error!("{}", FmError::CorruptedBuffer(e)),
        }
    }

    fn close_done(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closing.store(true, Ordering::SeqCst);
        info!("transport closed, releasing session");
        lock(&self.transport).take();
        let dropped = self.pending.drain();
        if !dropped.is_empty() {
            debug!("{} requests never completed", dropped.len());
        }
        drop(dropped);
        self.callbacks.disabled();
        self.callbacks.thread_event(ThreadEvent::Detach);
        self.slot.release();
    }
}

/// Tracks whether a session is live. `hal_init` waits here for the
/// previous session's close to complete.
#[derive(Default)]
pub struct SessionSlot {
    live: Mutex<bool>,
    released: Condvar,
}

impl SessionSlot {
    fn acquire(&self, config: &FmConfig) -> Result<()> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + config.hal_timeout;
        while *live {
            let now = Instant::now();
            if now >= deadline {
                if config.kill_on_stuck_close {
                    error!("previous session never closed, killing the process");
                    let _ = nix::sys::signal::kill(
                        nix::unistd::getpid(),
                        nix::sys::signal::Signal::SIGKILL,
                    );
                }
                error!("previous session never closed");
                return Err(FmError::SessionStuck);
            }
            info!("waiting for the previous session to close");
            live = self
                .released
                .wait_timeout(live, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *live = true;
        Ok(())
    }

    fn release(&self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.released.notify_all();
    }

    /// Whether a session currently holds the slot
    pub fn is_live(&self) -> bool {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Opens sessions. Sessions opened by one factory never overlap.
pub struct FmHalFactory {
    rt: Arc<Runtime>,
    config: FmConfig,
    slot: Arc<SessionSlot>,
}

impl FmHalFactory {
    /// Factory running its sessions' blocking waits on `rt`
    pub fn new(rt: Arc<Runtime>, config: FmConfig) -> Self {
        FmHalFactory { rt, config, slot: Arc::new(SessionSlot::default()) }
    }

    /// Whether a session from this factory is still live
    pub fn session_live(&self) -> bool {
        self.slot.is_live()
    }

    /// Opens a session once the previous one, if any, has closed
    pub fn hal_init(
        &self,
        callbacks: Arc<dyn FmHalCallbacks>,
        transport: &dyn TransportFactory,
    ) -> Result<Arc<FmHal>> {
        self.slot.acquire(&self.config)?;
        let hal = Arc::new(FmHal::new(
            self.rt.clone(),
            self.config.clone(),
            callbacks,
            self.slot.clone(),
        ));
        let sink: Arc<dyn EventSink> = hal.clone();
        let opened = match transport.init(sink, self.rt.clone()) {
            Ok(opened) => opened,
            Err(e) => {
                error!("transport init failed: {}", e);
                hal.closing.store(true, Ordering::SeqCst);
                hal.closed.store(true, Ordering::SeqCst);
                self.slot.release();
                return Err(e.into());
            }
        };
        {
            let mut slot = lock(&hal.transport);
            *slot = Some(opened);
            if hal.is_closed() {
                // closed before init returned
                slot.take();
            }
        }
        info!("session open");
        Ok(hal)
    }
}
