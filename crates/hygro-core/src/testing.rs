//! In-memory collaborators for unit tests. Time never passes: delays are
//! recorded, not slept.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::string::{String, ToString};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::vec::Vec;

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_sdmmc::{TimeSource, Timestamp};
use log::Level;

use crate::broker::{Broker, BrokerError, BrokerSession, MqQos};
use crate::config::InternetConfig;
use crate::feedback::FeedbackSink;
use crate::network::{LinkError, WifiLink};
use crate::sensors::{Measurement, Sensor, SensorError};
use crate::time::timestamp_from_unix;

/// Records every sleep in milliseconds.
#[derive(Debug, Default)]
pub struct FakeDelay {
    pub sleeps: Vec<u32>,
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.sleeps.push(ns / 1_000_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.sleeps.push(ms);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(Timestamp);

impl FixedClock {
    pub fn at(unix_secs: u64) -> Self {
        Self(timestamp_from_unix(unix_secs))
    }
}

impl TimeSource for FixedClock {
    fn get_timestamp(&self) -> Timestamp {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct FakeLed {
    pub history: Vec<bool>,
}

impl ErrorType for FakeLed {
    type Error = Infallible;
}

impl OutputPin for FakeLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.history.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.history.push(true);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingFeedback {
    pub led: Vec<bool>,
    pub lines: Vec<(Level, String)>,
}

impl RecordingFeedback {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|(_, line)| line.contains(needle))
    }
}

impl FeedbackSink for RecordingFeedback {
    fn log(&mut self, level: Level, message: &str) {
        self.lines.push((level, message.to_string()));
    }

    fn indicate(&mut self, on: bool) {
        self.led.push(on);
    }
}

pub struct ScriptedSensor {
    script: VecDeque<Result<Measurement, SensorError>>,
    /// Answer once the script runs out; `None` keeps failing.
    fallback: Option<Measurement>,
    pub calls: u32,
}

impl ScriptedSensor {
    pub const BUS_ERROR: SensorError = SensorError::ReadFailed {
        sensor: "stub",
        operation: "measure",
        details: "bus error",
    };

    pub fn failing_then(failures: u32, measurement: Measurement) -> Self {
        Self {
            script: (0..failures).map(|_| Err(Self::BUS_ERROR)).collect(),
            fallback: Some(measurement),
            calls: 0,
        }
    }

    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<Measurement, SensorError>>,
    {
        Self {
            script: results.into_iter().collect(),
            fallback: None,
            calls: 0,
        }
    }
}

impl Sensor for ScriptedSensor {
    async fn measure(&mut self) -> Result<Measurement, SensorError> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(result) => result,
            None => self.fallback.ok_or(Self::BUS_ERROR),
        }
    }
}

/// What the fakes saw, in order, across WiFi and broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    WifiRequest,
    BrokerConnect,
    BrokerConnectRefused,
    Publish(String),
    PublishFailed,
    Disconnect,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub struct ScriptedWifi {
    connected: bool,
    /// Polls left before the pending request succeeds. `None`: never.
    pending: Option<u32>,
    /// Per request, polls until associated. Falls back to `default_plan`.
    pub plan: VecDeque<Option<u32>>,
    default_plan: Option<u32>,
    /// `is_connected` calls made while associated
    live_checks: u32,
    /// Live check numbers (1-based) at which the link drops
    pub drop_at: Vec<u32>,
    pub reject: Option<LinkError>,
    pub connect_requests: u32,
    pub events: EventLog,
}

impl ScriptedWifi {
    fn new(connected: bool, default_plan: Option<u32>) -> Self {
        Self {
            connected,
            pending: None,
            plan: VecDeque::new(),
            default_plan,
            live_checks: 0,
            drop_at: Vec::new(),
            reject: None,
            connect_requests: 0,
            events: EventLog::default(),
        }
    }

    pub fn connected() -> Self {
        Self::new(true, Some(0))
    }

    pub fn connects_after(polls: u32) -> Self {
        Self::new(false, Some(polls))
    }

    pub fn never() -> Self {
        Self::new(false, None)
    }
}

impl WifiLink for ScriptedWifi {
    async fn begin_connect(&mut self, _credentials: &InternetConfig<'_>) -> Result<(), LinkError> {
        self.connect_requests += 1;
        self.events.borrow_mut().push(Event::WifiRequest);
        if let Some(e) = self.reject {
            return Err(e);
        }
        self.pending = self.plan.pop_front().unwrap_or(self.default_plan);
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        if self.connected {
            self.live_checks += 1;
            if self.drop_at.contains(&self.live_checks) {
                self.connected = false;
            }
            return self.connected;
        }
        match self.pending {
            Some(0) => {
                self.pending = None;
                self.connected = true;
                true
            }
            Some(left) => {
                self.pending = Some(left - 1);
                false
            }
            None => false,
        }
    }
}

pub struct RecordingBroker {
    pub events: EventLog,
    /// Refuse this many connects before accepting
    pub refuse_connects: u32,
    /// Publish attempt numbers (1-based) that fail
    pub fail_publish_at: Vec<u32>,
    publish_attempts: u32,
    published: u32,
    /// Raise the flag once this many publishes went through
    pub stop_after: Option<(u32, Arc<AtomicBool>)>,
    /// Every disconnect reports an error
    pub fail_disconnect: bool,
}

impl RecordingBroker {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            refuse_connects: 0,
            fail_publish_at: Vec::new(),
            publish_attempts: 0,
            published: 0,
            stop_after: None,
            fail_disconnect: false,
        }
    }
}

pub struct RecordingSession<'s> {
    broker: &'s mut RecordingBroker,
}

impl Broker for RecordingBroker {
    type Session<'s> = RecordingSession<'s>;

    async fn connect(&mut self) -> Result<RecordingSession<'_>, BrokerError> {
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            self.events.borrow_mut().push(Event::BrokerConnectRefused);
            return Err(BrokerError::Connect {
                reason: "Server unavailable",
            });
        }
        self.events.borrow_mut().push(Event::BrokerConnect);
        Ok(RecordingSession { broker: self })
    }
}

impl BrokerSession for RecordingSession<'_> {
    async fn publish(
        &mut self,
        _topic: &str,
        payload: &[u8],
        _qos: MqQos,
        _retain: bool,
    ) -> Result<(), BrokerError> {
        let broker = &mut *self.broker;
        broker.publish_attempts += 1;
        if broker.fail_publish_at.contains(&broker.publish_attempts) {
            broker.events.borrow_mut().push(Event::PublishFailed);
            return Err(BrokerError::Publish {
                reason: "socket closed",
            });
        }

        let text = String::from_utf8_lossy(payload).into_owned();
        broker.events.borrow_mut().push(Event::Publish(text));
        broker.published += 1;
        if let Some((limit, flag)) = &broker.stop_after
            && broker.published >= *limit
        {
            flag.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn disconnect(self) -> Result<(), BrokerError> {
        self.broker.events.borrow_mut().push(Event::Disconnect);
        if self.broker.fail_disconnect {
            return Err(BrokerError::Disconnect {
                reason: "Network error",
            });
        }
        Ok(())
    }
}
