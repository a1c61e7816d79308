//! Notifications from the engine to its owner (the JNI glue on Android).
//!
//! Push notifications fire every time the controller reports something.
//! Request/response notifications fire at most once per request, and not at
//! all when the request went through a blocking `get_fm_ctrl`.

/// Calling thread attach/detach requests, mirroring the JNI thread event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadEvent {
    /// Attach the delivery thread to the callback environment
    Attach = 0,
    /// Detach it again, the session is gone
    Detach = 1,
}

/// Program Service name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramService {
    /// Number of 8 character PS names in `text`
    pub num_ps: u8,
    pub pty: u8,
    pub pi: u16,
    pub text: Vec<u8>,
}

/// Radio Text, carriage return stripped
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RadioText {
    pub pty: u8,
    pub pi: u16,
    pub ab_flag: u8,
    pub text: Vec<u8>,
}

/// Alternative frequency list for the tuned station
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AfList {
    pub tune_freq: i32,
    pub pi: u16,
    pub freqs: Vec<i32>,
}

/// RT+ tag group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RtPlusTag {
    pub pty: u8,
    pub pi: u16,
    pub group_type: u8,
    pub tags: Vec<u8>,
}

/// Extended country code
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtCountryCode {
    pub pty: u8,
    pub pi: u16,
    pub ecc: u8,
    pub data: Vec<u8>,
}

/// A complete Enhanced Radio Text message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErtText {
    /// Text is UTF-8 rather than UCS-2
    pub utf8: bool,
    /// Right to left
    pub formatting_dir: bool,
    pub text: Vec<u8>,
}

/// Result of a station list search, as channel numbers relative to the band start
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchList {
    pub stations: Vec<u16>,
}

/// Everything the engine reports. All methods default to doing nothing.
#[allow(unused_variables)]
pub trait FmHalCallbacks: Send + Sync {
    fn enabled(&self) {}
    fn disabled(&self) {}
    fn tune(&self, freq: i32) {}
    fn seek_complete(&self, freq: i32) {}
    fn scan_next(&self) {}
    fn search_list(&self, list: &SearchList) {}
    fn stereo_status(&self, stereo: bool) {}
    fn rds_available(&self, available: bool) {}
    fn af_list(&self, list: &AfList) {}
    fn radio_text(&self, rt: &RadioText) {}
    fn program_service(&self, ps: &ProgramService) {}
    /// An eRT or RT+ carrier group was (re)assigned
    fn oda_update(&self) {}
    fn rt_plus(&self, tag: &RtPlusTag) {}
    fn ert(&self, ert: &ErtText) {}
    fn ext_country_code(&self, ecc: &ExtCountryCode) {}
    fn rds_group_counters(&self, counters: &[u8]) {}
    fn rds_group_counters_ext(&self, counters: &[u8]) {}
    fn peek(&self, data: &[u8]) {}
    fn ssbi_peek(&self, data: &[u8]) {}
    fn agc_gain(&self, data: &[u8]) {}
    fn thread_event(&self, event: ThreadEvent) {}
    fn get_ch_det_threshold(&self, val: i32, status: u8) {}
    fn set_ch_det_threshold(&self, status: u8) {}
    fn get_signal_threshold(&self, val: i32, status: u8) {}
    fn default_data_read(&self, val: i32, status: u8) {}
    fn default_data_write(&self, status: u8) {}
    fn get_blend(&self, val: i32, status: u8) {}
    fn set_blend(&self, status: u8) {}
    fn station_param(&self, val: i32, status: u8) {}
    fn station_dbg_param(&self, val: i32, status: u8) {}
    fn slimbus(&self, status: u8) {}
    fn softmute(&self, status: u8) {}
}
