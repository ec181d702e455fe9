//! Static device configuration
//!
//! Nothing is parsed at runtime. The firmware assembles a `const Config` from
//! build-time environment values, the simulator from its own constants.

use embassy_time::Duration;
use log::LevelFilter;
use thiserror_no_std::Error;

use crate::broker::MqQos;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "sensor/hygro/1/data";
pub const DEFAULT_LOG_FILE: &str = "_log.txt";

/// Public SNTP pools tried in order.
pub const DEFAULT_NTP_SERVERS: &[&str] = &[
    "pool.ntp.org",
    "time.cloudflare.com",
    "ntp.aliyun.com",
    "ntp.ntsc.ac.cn",
];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Missing(&'static str),
    #[error("broker port must not be zero")]
    InvalidPort,
}

#[derive(Debug, Clone, Copy)]
pub struct Config<'a> {
    pub internet: InternetConfig<'a>,
    pub broker: BrokerConfig<'a>,
    pub sampling: SamplingConfig,
    pub log: LogConfig<'a>,
    pub time: TimeConfig<'a>,
}

impl Config<'_> {
    pub const DEFAULT: Config<'static> = Config {
        internet: InternetConfig::DEFAULT,
        broker: BrokerConfig::DEFAULT,
        sampling: SamplingConfig::DEFAULT,
        log: LogConfig::DEFAULT,
        time: TimeConfig::DEFAULT,
    };

    /// Catches values that would make every session fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.internet.ssid.is_empty() {
            return Err(ConfigError::Missing("WiFi SSID"));
        }
        if self.broker.host.is_empty() {
            return Err(ConfigError::Missing("broker host"));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.broker.client_id.is_empty() {
            return Err(ConfigError::Missing("MQTT client id"));
        }
        if self.broker.topic.is_empty() {
            return Err(ConfigError::Missing("MQTT topic"));
        }
        Ok(())
    }
}

impl Default for Config<'static> {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
    /// How long to poll for an association before giving up.
    pub connect_timeout: Duration,
}

impl InternetConfig<'_> {
    pub const DEFAULT: InternetConfig<'static> = InternetConfig {
        ssid: "",
        password: "",
        connect_timeout: Duration::from_secs(30),
    };
}

#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig<'a> {
    /// IPv4 literal or DNS name
    pub host: &'a str,
    pub port: u16,
    /// Must be unique per broker
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub topic: &'a str,
    pub keep_alive_secs: u16,
    pub qos: MqQos,
    pub retain: bool,
}

impl BrokerConfig<'_> {
    pub const DEFAULT: BrokerConfig<'static> = BrokerConfig {
        host: "",
        port: DEFAULT_MQTT_PORT,
        client_id: "hygro-1",
        username: None,
        password: None,
        topic: DEFAULT_TOPIC,
        keep_alive_secs: 60,
        qos: MqQos::AtMostOnce,
        retain: false,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    /// Sleep between publish cycles
    pub interval: Duration,
    /// Sensor attempts per cycle
    pub max_attempts: u8,
    pub retry_delay: Duration,
    /// Pause between a failed session and the next one
    pub restart_delay: Duration,
    /// Stop after this many sessions. `None` runs until stopped.
    pub max_sessions: Option<u32>,
}

impl SamplingConfig {
    pub const DEFAULT: SamplingConfig = SamplingConfig {
        interval: Duration::from_secs(300),
        max_attempts: 3,
        retry_delay: Duration::from_secs(2),
        restart_delay: Duration::from_secs(6),
        max_sessions: None,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct LogConfig<'a> {
    pub file_name: &'a str,
    /// The file is reset once it grows past this
    pub max_bytes: u32,
    pub level: LevelFilter,
    pub timestamps: bool,
}

impl LogConfig<'_> {
    pub const DEFAULT: LogConfig<'static> = LogConfig {
        file_name: DEFAULT_LOG_FILE,
        max_bytes: 10 * 1024,
        level: LevelFilter::Info,
        timestamps: true,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct TimeConfig<'a> {
    pub servers: &'a [&'a str],
    pub attempts_per_server: u8,
    pub retry_delay: Duration,
    /// Added to UTC for every timestamp the device produces
    pub utc_offset_secs: i32,
}

impl TimeConfig<'_> {
    pub const DEFAULT: TimeConfig<'static> = TimeConfig {
        servers: DEFAULT_NTP_SERVERS,
        attempts_per_server: 3,
        retry_delay: Duration::from_secs(2),
        utc_offset_secs: 0,
    };
}
