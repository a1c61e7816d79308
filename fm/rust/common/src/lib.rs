//! FM radio common library

/// Logger setup shared by the FM HAL binaries and tests
pub mod logging;
/// System property access
pub mod sys_prop;

#[macro_use]
mod asserts;

pub use logging::init_logging;
