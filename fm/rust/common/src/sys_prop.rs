//! System properties
//!
//! On Android the values come from the property service through `getprop`.
//! Elsewhere the process environment stands in for it, so a host run can set
//! `persist.vendor.fm.cmd_timeout_ms=100` the same way a device would.

use log::debug;

#[cfg(target_os = "android")]
fn lookup(name: &str) -> Option<String> {
    let output = std::process::Command::new("/system/bin/getprop").arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(not(target_os = "android"))]
fn lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Gets the value of a system property, None if unset or empty
pub fn get(name: &str) -> Option<String> {
    let value = lookup(name).filter(|v| !v.is_empty());
    debug!("sys_prop {} = {:?}", name, value);
    value
}

/// Gets the specified property as a u32
pub fn get_u32(name: &str) -> Option<u32> {
    get(name).and_then(|value| value.parse().ok())
}

/// Gets the specified property as a u64
pub fn get_u64(name: &str) -> Option<u64> {
    get(name).and_then(|value| value.parse().ok())
}

/// Gets the specified property as a bool (logic follows libcutils/properties.cpp)
pub fn get_bool(name: &str) -> Option<bool> {
    get(name).and_then(|value| parse_bool(&value))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "0" | "n" | "no" | "false" | "off" => Some(false),
        "1" | "y" | "yes" | "true" | "on" => Some(true),
        _ => None,
    }
}

/// Gets whether the current build is debuggable
pub fn get_debuggable() -> bool {
    get_bool("ro.debuggable").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("y"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn unset_property_is_none() {
        assert_eq!(get("persist.vendor.fm.test.never_set"), None);
        assert_eq!(get_u32("persist.vendor.fm.test.never_set"), None);
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn host_reads_environment() {
        std::env::set_var("persist.vendor.fm.test.u32", "250");
        std::env::set_var("persist.vendor.fm.test.bool", "yes");
        assert_eq!(get_u32("persist.vendor.fm.test.u32"), Some(250));
        assert_eq!(get_u64("persist.vendor.fm.test.u32"), Some(250));
        assert_eq!(get_bool("persist.vendor.fm.test.bool"), Some(true));
    }
}
