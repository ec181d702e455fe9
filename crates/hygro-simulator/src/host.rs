//! Host stand-ins for the board: sensor, WiFi, broker, LED, log file,
//! clock and delay.

use std::convert::Infallible;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_sdmmc::{TimeSource, Timestamp};
use hygro_core::broker::{Broker, BrokerError, BrokerSession, MqQos};
use hygro_core::config::InternetConfig;
use hygro_core::feedback::{LogStore, LogStoreError};
use hygro_core::network::{LinkError, WifiLink};
use hygro_core::sensors::{Measurement, Sensor, SensorError};
use hygro_core::time::local_timestamp;
use log::{debug, info, warn};

/// Slow sinusoids with a bus fault every `fault_every` reads and an
/// implausible spike every `spike_every`.
pub struct SimSensor {
    reads: u32,
    fault_every: u32,
    spike_every: u32,
}

impl SimSensor {
    pub fn new(fault_every: u32, spike_every: u32) -> Self {
        Self {
            reads: 0,
            fault_every,
            spike_every,
        }
    }
}

impl Sensor for SimSensor {
    async fn measure(&mut self) -> Result<Measurement, SensorError> {
        self.reads += 1;
        let n = self.reads;

        if self.fault_every > 0 && n % self.fault_every == 0 {
            return Err(SensorError::ReadFailed {
                sensor: "SIM",
                operation: "measure temperature/humidity",
                details: "simulated bus fault",
            });
        }
        if self.spike_every > 0 && n % self.spike_every == 0 {
            return Ok(Measurement::new(151.0, -3.0));
        }

        let t = f64::from(n);
        let temperature = 22.0 + 3.0 * (t / 12.0).sin() + 0.4 * (t / 5.0).cos();
        let humidity = 48.0 + 9.0 * (t / 17.0).sin() + 1.5 * (t / 3.0).cos();
        Ok(Measurement::new(temperature as f32, humidity as f32))
    }
}

/// Associates immediately; drops the link on every `drop_every`-th check.
pub struct SimWifi {
    associated: bool,
    checks: u32,
    drop_every: u32,
}

impl SimWifi {
    pub fn new(drop_every: u32) -> Self {
        Self {
            associated: false,
            checks: 0,
            drop_every,
        }
    }
}

impl WifiLink for SimWifi {
    async fn begin_connect(&mut self, credentials: &InternetConfig<'_>) -> Result<(), LinkError> {
        info!("wifi: joining '{}'", credentials.ssid);
        self.associated = true;
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        self.checks += 1;
        if self.associated && self.drop_every > 0 && self.checks % self.drop_every == 0 {
            warn!("wifi: simulated link drop");
            self.associated = false;
        }
        self.associated
    }

    fn address(&self) -> Option<core::net::Ipv4Addr> {
        self.associated
            .then_some(core::net::Ipv4Addr::new(192, 168, 4, 20))
    }
}

/// Prints publishes to stdout and rejects every `fail_every`-th one.
pub struct ConsoleBroker {
    publishes: u32,
    fail_every: u32,
}

impl ConsoleBroker {
    pub fn new(fail_every: u32) -> Self {
        Self {
            publishes: 0,
            fail_every,
        }
    }
}

pub struct ConsoleSession<'s> {
    broker: &'s mut ConsoleBroker,
}

impl Broker for ConsoleBroker {
    type Session<'s> = ConsoleSession<'s>;

    async fn connect(&mut self) -> Result<ConsoleSession<'_>, BrokerError> {
        info!("mqtt: console broker connected");
        Ok(ConsoleSession { broker: self })
    }
}

impl BrokerSession for ConsoleSession<'_> {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.broker.publishes += 1;
        let n = self.broker.publishes;
        if self.broker.fail_every > 0 && n % self.broker.fail_every == 0 {
            return Err(BrokerError::Publish {
                reason: "simulated broker failure",
            });
        }

        println!(
            "[{} retain={}] {} <- {}",
            qos.as_str(),
            retain,
            topic,
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }

    async fn disconnect(self) -> Result<(), BrokerError> {
        info!("mqtt: console broker disconnected");
        Ok(())
    }
}

pub struct SimLed;

impl ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        debug!("led: off");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        debug!("led: on");
        Ok(())
    }
}

/// The log file in the working directory.
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn io_error(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::PermissionDenied => "permission denied",
        io::ErrorKind::StorageFull => "disk full",
        _ => "I/O error",
    }
}

impl LogStore for FileLogStore {
    fn len(&mut self) -> Result<u32, LogStoreError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(u32::try_from(meta.len()).unwrap_or(u32::MAX)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(LogStoreError::Unavailable(io_error(&e))),
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), LogStoreError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(bytes))
            .map_err(|e| LogStoreError::Write(io_error(&e)))
    }

    fn truncate(&mut self) -> Result<(), LogStoreError> {
        fs::File::create(&self.path)
            .map(drop)
            .map_err(|e| LogStoreError::Write(io_error(&e)))
    }
}

/// Host wall clock shifted by a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    utc_offset_secs: i32,
}

impl HostClock {
    pub fn new(utc_offset_secs: i32) -> Self {
        Self { utc_offset_secs }
    }
}

impl TimeSource for HostClock {
    fn get_timestamp(&self) -> Timestamp {
        let utc = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        local_timestamp(utc, self.utc_offset_secs)
    }
}

/// Blocking sleep, shortened by `speedup`.
pub struct ScaledDelay {
    speedup: u32,
}

impl ScaledDelay {
    pub fn new(speedup: u32) -> Self {
        Self {
            speedup: speedup.max(1),
        }
    }
}

impl DelayNs for ScaledDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns) / u64::from(self.speedup)));
    }

    async fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)) / self.speedup);
    }
}
