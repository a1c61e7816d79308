//! Engine tunables, read from system properties

use fm_common::sys_prop;
use std::time::Duration;

/// How long a blocking get waits for its response
pub const HELIUM_CMD_TIME_OUT: Duration = Duration::from_secs(5);
/// How long `hal_init` waits, per round, for the previous session to close
pub const HAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Engine configuration
#[derive(Clone, Debug)]
pub struct FmConfig {
    /// Bound on a synchronous command bridge wait
    pub cmd_timeout: Duration,
    /// Bound on waiting for a previous session to close
    pub hal_timeout: Duration,
    /// SIGKILL the process when the previous session never closes.
    /// When false `hal_init` fails with `SessionStuck` instead.
    pub kill_on_stuck_close: bool,
}

impl FmConfig {
    /// Defaults overridden by `persist.vendor.fm.*` properties
    pub fn from_sys_props() -> Self {
        let defaults = Self::default();
        Self {
            cmd_timeout: sys_prop::get_u64("persist.vendor.fm.cmd_timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cmd_timeout),
            hal_timeout: sys_prop::get_u64("persist.vendor.fm.hal_timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.hal_timeout),
            kill_on_stuck_close: sys_prop::get_bool("persist.vendor.fm.kill_on_stuck_close")
                .unwrap_or(defaults.kill_on_stuck_close),
        }
    }
}

impl Default for FmConfig {
    fn default() -> Self {
        Self {
            cmd_timeout: HELIUM_CMD_TIME_OUT,
            hal_timeout: HAL_TIMEOUT,
            kill_on_stuck_close: true,
        }
    }
}
