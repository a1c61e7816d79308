use std::sync::Once;

static INIT: Once = Once::new();

/// Tag used for every FM HAL log line on Android
pub const LOG_TAG: &str = "radio_helium";

/// Installs the platform logger once per process. Later calls are no-ops.
pub fn init_logging() {
    INIT.call_once(install);
}

#[cfg(target_os = "android")]
fn install() {
    android_logger::init_once(
        android_logger::Config::default().with_tag(LOG_TAG).with_min_level(log::Level::Debug),
    );
}

#[cfg(not(target_os = "android"))]
fn install() {
    // try_init tolerates a logger installed by the embedding process
    let _ = env_logger::Builder::from_default_env().is_test(cfg!(test)).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
        log::info!("logger installed for {}", LOG_TAG);
    }
}
