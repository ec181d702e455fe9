//! Sensor abstraction and the retrying reader built on top of it

mod reader;

pub use reader::*;

use core::ops::RangeInclusive;

use thiserror_no_std::Error;

/// Plausible temperature span in °C. Anything outside is treated as a bad read.
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = -40.0..=80.0;

/// Plausible relative humidity span in %.
pub const HUMIDITY_RANGE: RangeInclusive<f32> = 0.0..=100.0;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: no response within the measurement window")]
    Timeout { sensor: &'static str },
    #[error("implausible reading: {temperature} °C, {humidity} %")]
    OutOfRange { temperature: f32, humidity: f32 },
}

/// Raw values straight from a sensor driver, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature: f32,
    pub humidity: f32,
}

impl Measurement {
    pub const fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Both values inside their plausible ranges. NaN never is.
    pub fn is_plausible(&self) -> bool {
        TEMPERATURE_RANGE.contains(&self.temperature) && HUMIDITY_RANGE.contains(&self.humidity)
    }

    pub fn validate(self) -> Result<Self, SensorError> {
        if self.is_plausible() {
            Ok(self)
        } else {
            Err(SensorError::OutOfRange {
                temperature: self.temperature,
                humidity: self.humidity,
            })
        }
    }
}

/// A single temperature/humidity sensor.
pub trait Sensor {
    /// Take one measurement. No retrying or range checking happens here.
    fn measure(&mut self) -> impl Future<Output = Result<Measurement, SensorError>>;
}
