//! FM radio Host Controller Interface engine
//!
//! Frames commands for the FM controller, matches its responses back to the
//! requests that caused them, and turns asynchronous events into callbacks.

#[macro_use]
extern crate lazy_static;

/// Callback surface toward the FM service
pub mod callbacks;
/// Command dispatcher
pub mod commands;
/// Engine tunables
pub mod config;
/// Control get/set interface
pub mod controls;
/// FM HCI errors
pub mod error;
/// Event demultiplexer
pub mod events;
/// Outstanding request tracking
pub mod pending;
/// Host side radio state
pub mod radio;
/// RDS group reassembly
pub mod rds;
/// Command-complete handlers
pub mod responses;
/// Session lifecycle
pub mod session;

#[cfg(test)]
mod testing;

pub use callbacks::FmHalCallbacks;
pub use config::FmConfig;
pub use controls::Control;
pub use error::{FmError, Result};
pub use session::{FmHal, FmHalFactory};

use fm_hal::TransportFactory;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Builder, Runtime};

lazy_static! {
    // Runtime for blocking command waits and the transport's reader task.
    static ref RUNTIME: Arc<Runtime> = Arc::new(
        Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap()
    );
    static ref FACTORY: FmHalFactory =
        FmHalFactory::new(RUNTIME.clone(), FmConfig::from_sys_props());
}

/// Shared runtime used by the process wide factory
pub fn get_runtime() -> Arc<Runtime> {
    RUNTIME.clone()
}

/// Opens the process wide session, waiting for the previous one to close
pub fn hal_init(
    callbacks: Arc<dyn FmHalCallbacks>,
    transport: &dyn TransportFactory,
) -> Result<Arc<FmHal>> {
    fm_common::init_logging();
    FACTORY.hal_init(callbacks, transport)
}

/// Locks `m`, carrying on with the data of a poisoned lock
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
