//! Host simulator for the hygro publish loop.
//!
//! Runs the real `PublishLoop` against simulated hardware: a drifting
//! sensor with bus faults and implausible spikes, a WiFi link that drops now
//! and then, and a console broker that refuses every few publishes. Log lines
//! rotate in `_log.txt` in the working directory.
//!
//! `HYGRO_SIM_SPEEDUP` (default 60) divides every sleep, so the 5 minute
//! sampling interval passes in 5 seconds. Type `q` and Enter to stop after
//! the current cycle. `RUST_LOG=debug` shows LED changes.

mod host;

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::block_on;
use hygro_core::config::{BrokerConfig, Config, InternetConfig};
use hygro_core::feedback::{Feedback, RotatingLog};
use hygro_core::network::NetworkSession;
use hygro_core::publisher::{PublishLoop, Station};
use hygro_core::sensors::SensorReader;
use log::info;

use host::{ConsoleBroker, FileLogStore, HostClock, ScaledDelay, SimLed, SimSensor, SimWifi};

const DEFAULT_SPEEDUP: u32 = 60;

static STOP: AtomicBool = AtomicBool::new(false);

const CONFIG: Config<'static> = Config {
    internet: InternetConfig {
        ssid: "hygro-sim",
        password: "simulated",
        ..InternetConfig::DEFAULT
    },
    broker: BrokerConfig {
        host: "console",
        client_id: "hygro-sim",
        ..BrokerConfig::DEFAULT
    },
    ..Config::DEFAULT
};

fn speedup_from_env() -> u32 {
    std::env::var("HYGRO_SIM_SPEEDUP")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SPEEDUP)
}

fn spawn_stop_listener() {
    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    info!("stop requested, finishing the current cycle");
                    STOP.store(true, Ordering::Relaxed);
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CONFIG;
    if let Err(e) = config.validate() {
        log::error!("configuration invalid: {}", e);
        return;
    }

    let speedup = speedup_from_env();
    info!("Starting hygro simulator ({}x speed)", speedup);
    info!("Publishing to '{}', type q + Enter to stop", config.broker.topic);

    spawn_stop_listener();

    let clock = HostClock::new(config.time.utc_offset_secs);
    let log = RotatingLog::new(FileLogStore::new(config.log.file_name), &config.log);
    let station = Station {
        reader: SensorReader::new(SimSensor::new(7, 11), clock),
        network: NetworkSession::new(SimWifi::new(13)),
        feedback: Feedback::new(SimLed, log, clock),
        delay: ScaledDelay::new(speedup),
    };

    let mut app = PublishLoop::new(&config, station, ConsoleBroker::new(5));
    let summary = block_on(app.run(&STOP));

    let stats = app.station().reader.statistics();
    info!(
        "Stopped after {} sessions ({} failed), {} readings published",
        summary.sessions, summary.failures, summary.published
    );
    info!(
        "Sensor: {} reads, {} errors, {} failed attempts, {:.0}% success",
        stats.total_reads,
        stats.errors,
        stats.failed_attempts,
        stats.success_rate()
    );
}
