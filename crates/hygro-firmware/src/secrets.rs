//! Build-time device settings
//!
//! `build.rs` forwards the entries of `.env` as compile-time environment
//! variables. Everything missing falls back to the core defaults, so a bare
//! checkout still builds (and then fails `Config::validate` at boot).

use hygro_core::config::{BrokerConfig, Config, InternetConfig, TimeConfig};

const fn env_or(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(v) => v,
        None => default,
    }
}

/// Empty strings count as unset.
const fn non_empty(value: Option<&'static str>) -> Option<&'static str> {
    match value {
        Some(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

const fn parse_u16(value: Option<&'static str>, default: u16) -> u16 {
    let bytes = match value {
        Some(v) if !v.is_empty() => v.as_bytes(),
        _ => return default,
    };
    let mut out: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let digit = bytes[i];
        if !digit.is_ascii_digit() {
            return default;
        }
        out = out * 10 + (digit - b'0') as u32;
        if out > u16::MAX as u32 {
            return default;
        }
        i += 1;
    }
    out as u16
}

const fn parse_hours(value: Option<&'static str>) -> i32 {
    let bytes = match value {
        Some(v) if !v.is_empty() => v.as_bytes(),
        _ => return 0,
    };
    let (negative, mut i) = match bytes[0] {
        b'-' => (true, 1),
        b'+' => (false, 1),
        _ => (false, 0),
    };
    let mut hours: i32 = 0;
    while i < bytes.len() {
        let digit = bytes[i];
        if !digit.is_ascii_digit() || hours > 14 {
            return 0;
        }
        hours = hours * 10 + (digit - b'0') as i32;
        i += 1;
    }
    if negative { -hours } else { hours }
}

pub const WIFI_SSID: &str = env_or(option_env!("WIFI_SSID"), "");
pub const WIFI_PASSWORD: &str = env_or(option_env!("WIFI_PASSWORD"), "");

pub const CONFIG: Config<'static> = Config {
    internet: InternetConfig {
        ssid: WIFI_SSID,
        password: WIFI_PASSWORD,
        ..InternetConfig::DEFAULT
    },
    broker: BrokerConfig {
        host: env_or(option_env!("MQTT_HOST"), ""),
        port: parse_u16(option_env!("MQTT_PORT"), BrokerConfig::DEFAULT.port),
        client_id: env_or(option_env!("MQTT_CLIENT_ID"), BrokerConfig::DEFAULT.client_id),
        username: non_empty(option_env!("MQTT_USERNAME")),
        password: non_empty(option_env!("MQTT_PASSWORD")),
        topic: env_or(option_env!("MQTT_TOPIC"), BrokerConfig::DEFAULT.topic),
        ..BrokerConfig::DEFAULT
    },
    time: TimeConfig {
        utc_offset_secs: parse_hours(option_env!("UTC_OFFSET_HOURS")) * 3600,
        ..TimeConfig::DEFAULT
    },
    ..Config::DEFAULT
};
