//! The sample/publish loop and its restart cycle
//!
//! ```text
//! Init -> Connecting -> Running -> Teardown -> RestartDelay -> Connecting ...
//!              |                      ^
//!              +----------------------+  (connect failure)
//! ```
//!
//! A session is one pass from `Connecting` to `Teardown`. Sessions are
//! repeated by a plain loop in [`PublishLoop::run`], so a device that loses
//! its broker a thousand times still runs in constant stack.

use alloc::format;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal_async::delay::DelayNs;
use embedded_sdmmc::TimeSource;
use log::{debug, info};

use crate::app_state::{AppError, RunState, RunSummary, SessionState};
use crate::broker::{Broker, BrokerSession};
use crate::config::Config;
use crate::duration_ms;
use crate::feedback::FeedbackSink;
use crate::network::{NetworkSession, WifiLink};
use crate::sensors::{RetryPolicy, Sensor, SensorReader};

/// Everything a session uses apart from the broker.
pub struct Station<S, C, W, F, D> {
    pub reader: SensorReader<S, C>,
    pub network: NetworkSession<W>,
    pub feedback: F,
    pub delay: D,
}

impl<S, C, W, F, D> Station<S, C, W, F, D>
where
    S: Sensor,
    C: TimeSource,
    W: WifiLink,
    F: FeedbackSink,
    D: DelayNs,
{
    /// Cycles until stopped (`Ok`) or until a failure ends the session.
    async fn run_cycles<L: BrokerSession>(
        &mut self,
        link: &mut L,
        config: &Config<'_>,
        session: &mut SessionState,
        stop: &AtomicBool,
    ) -> Result<(), AppError> {
        loop {
            if stop.load(Ordering::Relaxed) {
                self.feedback.info("stop requested");
                return Ok(());
            }

            self.cycle(link, config, session).await?;
            self.delay.delay_ms(duration_ms(config.sampling.interval)).await;
        }
    }

    async fn cycle<L: BrokerSession>(
        &mut self,
        link: &mut L,
        config: &Config<'_>,
        session: &mut SessionState,
    ) -> Result<(), AppError> {
        if !self.network.is_connected().await {
            session.retry_count += 1;
            self.feedback.warn("WiFi link lost, reconnecting");
            self.network
                .connect(&config.internet, &mut self.delay)
                .await
                .map_err(AppError::Reconnect)?;
            self.feedback.info("WiFi link restored");
        }

        let policy = RetryPolicy::from(&config.sampling);
        let reading = match self
            .reader
            .read(policy, &mut self.feedback, &mut self.delay)
            .await
        {
            Ok(reading) => reading,
            Err(e) => {
                session.error_count += 1;
                debug!("cycle skipped ({:?}): {}", e.kind(), e);
                return Ok(());
            }
        };

        let payload = reading.to_payload().map_err(AppError::Payload)?;
        let broker = &config.broker;
        debug!(
            "publishing to '{}' {} retain={}",
            broker.topic,
            broker.qos.as_str(),
            broker.retain
        );
        link.publish(broker.topic, payload.as_bytes(), broker.qos, broker.retain)
            .await
            .map_err(AppError::Publish)?;

        session.published += 1;
        self.feedback.info(&format!("published {}", payload));
        Ok(())
    }
}

/// Owns every collaborator and drives sessions until stopped.
pub struct PublishLoop<'a, S, C, W, B, F, D> {
    config: &'a Config<'a>,
    station: Station<S, C, W, F, D>,
    broker: B,
    run_state: RunState,
    session: SessionState,
    summary: RunSummary,
}

impl<'a, S, C, W, B, F, D> PublishLoop<'a, S, C, W, B, F, D>
where
    S: Sensor,
    C: TimeSource,
    W: WifiLink,
    B: Broker,
    F: FeedbackSink,
    D: DelayNs,
{
    pub fn new(config: &'a Config<'a>, station: Station<S, C, W, F, D>, broker: B) -> Self {
        Self {
            config,
            station,
            broker,
            run_state: RunState::Init,
            session: SessionState::default(),
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.run_state
    }

    /// Counters of the current, or last, session.
    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn station(&self) -> &Station<S, C, W, F, D> {
        &self.station
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Runs sessions back to back, pausing `restart_delay` after each
    /// failure. Returns when `stop` is raised (checked between cycles and
    /// before each restart) or when `max_sessions` have run.
    pub async fn run(&mut self, stop: &AtomicBool) -> RunSummary {
        self.station.feedback.indicate(true);
        self.station.feedback.info("publish loop started");

        while !stop.load(Ordering::Relaxed) && !self.limit_reached() {
            self.summary.sessions += 1;
            self.session = SessionState::default();

            if let Err(e) = self.run_session(stop).await {
                self.summary.failures += 1;
                self.station.feedback.error(&format!(
                    "session {} ended ({:?}): {}",
                    self.summary.sessions,
                    e.kind(),
                    e
                ));
            }

            if stop.load(Ordering::Relaxed) || self.limit_reached() {
                break;
            }

            self.run_state = RunState::RestartDelay;
            let restart_delay = self.config.sampling.restart_delay;
            self.station
                .feedback
                .info(&format!("restarting in {} s", restart_delay.as_secs()));
            self.station.delay.delay_ms(duration_ms(restart_delay)).await;
        }

        self.run_state = RunState::Stopped;
        self.station.feedback.info(&format!(
            "publish loop stopped after {} sessions, {} published",
            self.summary.sessions, self.summary.published
        ));
        self.summary
    }

    fn limit_reached(&self) -> bool {
        self.config
            .sampling
            .max_sessions
            .is_some_and(|limit| self.summary.sessions >= limit)
    }

    /// One session. `Ok` only when stopped; the broker is always released
    /// before returning.
    async fn run_session(&mut self, stop: &AtomicBool) -> Result<(), AppError> {
        let config = self.config;
        let station = &mut self.station;

        self.run_state = RunState::Connecting;
        if let Err(e) = station
            .network
            .connect(&config.internet, &mut station.delay)
            .await
        {
            self.run_state = RunState::Teardown;
            return Err(AppError::Network(e));
        }

        let mut link = match self.broker.connect().await {
            Ok(link) => link,
            Err(e) => {
                self.run_state = RunState::Teardown;
                return Err(AppError::Broker(e));
            }
        };
        self.session.connected = true;
        station.feedback.info(&format!(
            "connected to broker {}:{}",
            config.broker.host, config.broker.port
        ));

        self.run_state = RunState::Running;
        let outcome = station
            .run_cycles(&mut link, config, &mut self.session, stop)
            .await;

        self.run_state = RunState::Teardown;
        match link.disconnect().await {
            Ok(()) => info!("broker session closed"),
            Err(e) => station
                .feedback
                .warn(&format!("broker disconnect failed, ignoring: {}", e)),
        }
        self.session.connected = false;
        self.summary.published += self.session.published;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::FailureKind;
    use crate::config::{BrokerConfig, InternetConfig, SamplingConfig};
    use crate::sensors::Measurement;
    use crate::testing::{
        Event, EventLog, FakeDelay, FixedClock, RecordingBroker, RecordingFeedback,
        ScriptedSensor, ScriptedWifi,
    };
    use embassy_futures::block_on;
    use embassy_time::Duration;
    use std::sync::Arc;

    type TestLoop<'a> = PublishLoop<
        'a,
        ScriptedSensor,
        FixedClock,
        ScriptedWifi,
        RecordingBroker,
        RecordingFeedback,
        FakeDelay,
    >;

    const INTERVAL_MS: u32 = 300_000;
    const RESTART_MS: u32 = 6_000;
    const PAYLOAD: &str =
        r#"{"created_at": "2025-01-01T00:00:00", "temperature": 21.5, "humidity": 48.2}"#;

    fn config(max_sessions: Option<u32>) -> Config<'static> {
        Config {
            internet: InternetConfig {
                ssid: "lab",
                password: "hunter2",
                connect_timeout: Duration::from_secs(3),
            },
            broker: BrokerConfig {
                host: "10.0.0.2",
                ..BrokerConfig::DEFAULT
            },
            sampling: SamplingConfig {
                max_sessions,
                ..SamplingConfig::DEFAULT
            },
            ..Config::DEFAULT
        }
    }

    struct Rig {
        events: EventLog,
        stop: Arc<AtomicBool>,
        wifi: ScriptedWifi,
        broker: RecordingBroker,
        sensor: ScriptedSensor,
    }

    impl Rig {
        fn new() -> Self {
            let events = EventLog::default();
            let mut wifi = ScriptedWifi::connected();
            wifi.events = events.clone();
            Self {
                broker: RecordingBroker::new(events.clone()),
                events,
                stop: Arc::new(AtomicBool::new(false)),
                wifi,
                sensor: ScriptedSensor::failing_then(0, Measurement::new(21.5, 48.2)),
            }
        }

        fn stop_after(mut self, publishes: u32) -> Self {
            self.broker.stop_after = Some((publishes, self.stop.clone()));
            self
        }

        fn build<'a>(
            self,
            config: &'a Config<'static>,
        ) -> (TestLoop<'a>, EventLog, Arc<AtomicBool>) {
            let station = Station {
                reader: SensorReader::new(self.sensor, FixedClock::at(1_735_689_600)),
                network: NetworkSession::new(self.wifi),
                feedback: RecordingFeedback::default(),
                delay: FakeDelay::default(),
            };
            (
                PublishLoop::new(config, station, self.broker),
                self.events,
                self.stop,
            )
        }
    }

    fn events(log: &EventLog) -> Vec<Event> {
        log.borrow().clone()
    }

    fn published() -> Event {
        Event::Publish(PAYLOAD.into())
    }

    #[test]
    fn test_publishes_each_cycle_until_stopped() {
        let config = config(None);
        let (mut publish_loop, log, stop) = Rig::new().stop_after(3).build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [
                Event::BrokerConnect,
                published(),
                published(),
                published(),
                Event::Disconnect
            ]
        );
        assert_eq!(
            summary,
            RunSummary {
                sessions: 1,
                failures: 0,
                published: 3
            }
        );
        assert_eq!(publish_loop.station().delay.sleeps, [INTERVAL_MS; 3]);
        assert_eq!(publish_loop.state(), RunState::Stopped);
    }

    #[test]
    fn test_publish_failure_tears_down_before_reconnecting() {
        let config = config(None);
        let mut rig = Rig::new().stop_after(2);
        rig.broker.fail_publish_at = vec![2];
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [
                Event::BrokerConnect,
                published(),
                Event::PublishFailed,
                Event::Disconnect,
                Event::BrokerConnect,
                published(),
                Event::Disconnect
            ]
        );
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.published, 2);
        assert_eq!(
            publish_loop.station().delay.sleeps,
            [INTERVAL_MS, RESTART_MS, INTERVAL_MS]
        );
        assert!(publish_loop.station().feedback.contains("restarting in 6 s"));
    }

    #[test]
    fn test_dropped_link_reconnects_and_keeps_publishing() {
        let config = config(None);
        let mut rig = Rig::new().stop_after(2);
        // Check 1 is the session connect, check 2 the first cycle
        rig.wifi.drop_at = vec![3];
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [
                Event::BrokerConnect,
                published(),
                Event::WifiRequest,
                published(),
                Event::Disconnect
            ]
        );
        assert_eq!(summary.failures, 0);
        assert_eq!(publish_loop.session().retry_count, 1);
        assert!(publish_loop.station().feedback.contains("WiFi link restored"));
    }

    #[test]
    fn test_failed_reconnect_restarts_after_delay() {
        let config = config(None);
        let mut rig = Rig::new().stop_after(1);
        rig.wifi.drop_at = vec![2];
        rig.wifi.plan.push_back(None);
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [
                Event::BrokerConnect,
                Event::WifiRequest,
                Event::Disconnect,
                Event::WifiRequest,
                Event::BrokerConnect,
                published(),
                Event::Disconnect
            ]
        );
        assert_eq!(summary.failures, 1);
        // Three one-second polls, the restart pause, then one interval
        assert_eq!(
            publish_loop.station().delay.sleeps,
            [1000, 1000, 1000, RESTART_MS, INTERVAL_MS]
        );
        assert!(
            publish_loop
                .station()
                .feedback
                .contains("WiFi reconnect failed")
        );
    }

    #[test]
    fn test_sensor_failure_skips_publish_but_keeps_session() {
        let config = config(None);
        let mut rig = Rig::new().stop_after(1);
        rig.sensor = ScriptedSensor::failing_then(3, Measurement::new(21.5, 48.2));
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [Event::BrokerConnect, published(), Event::Disconnect]
        );
        assert_eq!(summary.failures, 0);
        assert_eq!(publish_loop.session().error_count, 1);
        assert_eq!(
            publish_loop.station().delay.sleeps,
            [2000, 2000, INTERVAL_MS, INTERVAL_MS]
        );
    }

    #[test]
    fn test_refused_broker_is_retried_without_disconnect() {
        let config = config(None);
        let mut rig = Rig::new().stop_after(1);
        rig.broker.refuse_connects = 1;
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [
                Event::BrokerConnectRefused,
                Event::BrokerConnect,
                published(),
                Event::Disconnect
            ]
        );
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(
            publish_loop.station().delay.sleeps,
            [RESTART_MS, INTERVAL_MS]
        );
    }

    #[test]
    fn test_failed_disconnect_is_logged_and_ignored() {
        let config = config(None);
        let mut rig = Rig::new().stop_after(1);
        rig.broker.fail_publish_at = vec![1];
        rig.broker.fail_disconnect = true;
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(
            events(&log),
            [
                Event::BrokerConnect,
                Event::PublishFailed,
                Event::Disconnect,
                Event::BrokerConnect,
                published(),
                Event::Disconnect
            ]
        );
        assert_eq!(
            summary,
            RunSummary {
                sessions: 2,
                failures: 1,
                published: 1
            }
        );
        assert_eq!(
            publish_loop.station().delay.sleeps,
            [RESTART_MS, INTERVAL_MS]
        );
        assert!(
            publish_loop
                .station()
                .feedback
                .contains("broker disconnect failed, ignoring")
        );
        assert_eq!(publish_loop.state(), RunState::Stopped);
    }

    #[test]
    fn test_wifi_timeout_at_session_start_restarts_after_delay() {
        let config = config(Some(2));
        let mut rig = Rig::new();
        rig.wifi = ScriptedWifi::never();
        rig.wifi.events = rig.events.clone();
        let (mut publish_loop, log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        // No broker traffic without a link, so nothing to disconnect
        assert_eq!(events(&log), [Event::WifiRequest, Event::WifiRequest]);
        assert_eq!(
            summary,
            RunSummary {
                sessions: 2,
                failures: 2,
                published: 0
            }
        );
        assert_eq!(
            publish_loop.station().delay.sleeps,
            [1000, 1000, 1000, RESTART_MS, 1000, 1000, 1000]
        );
        let feedback = &publish_loop.station().feedback;
        assert!(feedback.contains("session 1 ended (Connectivity)"));
        assert!(feedback.contains("restarting in 6 s"));
        assert_eq!(publish_loop.state(), RunState::Stopped);
    }

    #[test]
    fn test_session_limit_ends_run() {
        let config = config(Some(3));
        let mut rig = Rig::new();
        rig.broker.refuse_connects = u32::MAX;
        let (mut publish_loop, _log, stop) = rig.build(&config);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(summary.sessions, 3);
        assert_eq!(summary.failures, 3);
        assert_eq!(publish_loop.station().delay.sleeps, [RESTART_MS, RESTART_MS]);
        assert_eq!(publish_loop.state(), RunState::Stopped);
    }

    #[test]
    fn test_raised_stop_flag_runs_nothing() {
        let config = config(None);
        let (mut publish_loop, log, stop) = Rig::new().build(&config);
        stop.store(true, Ordering::Relaxed);

        let summary = block_on(publish_loop.run(&stop));

        assert_eq!(summary, RunSummary::default());
        assert!(events(&log).is_empty());
    }

    #[test]
    fn test_failure_is_logged_with_its_kind() {
        let config = config(Some(1));
        let mut rig = Rig::new();
        rig.broker.fail_publish_at = vec![1];
        let (mut publish_loop, _log, stop) = rig.build(&config);

        block_on(publish_loop.run(&stop));

        let feedback = &publish_loop.station().feedback;
        let expected = format!("({:?})", FailureKind::Publish);
        assert!(feedback.contains(&expected));
        assert!(feedback.contains("socket closed"));
    }
}
