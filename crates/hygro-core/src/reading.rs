//! Validated readings and their JSON wire form

use alloc::string::String;

use serde::Serialize;
use thiserror_no_std::Error;

use crate::sensors::{Measurement, SensorError};

/// `YYYY-MM-DDTHH:MM:SS`, with head room for custom clocks.
pub type Iso8601 = heapless::String<32>;

pub const PAYLOAD_CAPACITY: usize = 128;

/// Serialized reading, ready to hand to the broker.
pub type Payload = heapless::String<PAYLOAD_CAPACITY>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload does not fit in {capacity} bytes")]
    TooLarge { capacity: usize },
    #[error("value could not be encoded as JSON")]
    Encode,
}

fn too_large<E>(_: E) -> PayloadError {
    PayloadError::TooLarge {
        capacity: PAYLOAD_CAPACITY,
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, PayloadError> {
    serde_json::to_string(value).map_err(|_| PayloadError::Encode)
}

/// One validated sample. Fields are private so an out-of-range reading cannot
/// be built outside [`Reading::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    temperature: f32,
    humidity: f32,
    timestamp: Iso8601,
}

impl Reading {
    pub fn new(measurement: Measurement, timestamp: Iso8601) -> Result<Self, SensorError> {
        let Measurement {
            temperature,
            humidity,
        } = measurement.validate()?;

        Ok(Self {
            temperature,
            humidity,
            timestamp,
        })
    }

    /// Degrees Celsius
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn temperature_fahrenheit(&self) -> f32 {
        self.temperature * 9.0 / 5.0 + 32.0
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f32 {
        self.humidity
    }

    pub fn timestamp(&self) -> &str {
        self.timestamp.as_str()
    }

    /// Renders the broker payload:
    ///
    /// `{"created_at": "2025-01-01T00:00:00", "temperature": 21.5, "humidity": 48.2}`
    ///
    /// Floats use their shortest round-trip form, so whole numbers keep a
    /// trailing `.0` (`22.0`).
    pub fn to_payload(&self) -> Result<Payload, PayloadError> {
        let fields = [
            ("created_at", encode(self.timestamp.as_str())?),
            ("temperature", encode(&self.temperature)?),
            ("humidity", encode(&self.humidity)?),
        ];

        // serde_json only exposes its compact formatter without `std`, so the
        // object frame with `", "` and `": "` separators is laid out here.
        let mut out = Payload::new();
        out.push('{').map_err(too_large)?;
        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 {
                out.push_str(", ").map_err(too_large)?;
            }
            out.push_str(&encode(*key)?).map_err(too_large)?;
            out.push_str(": ").map_err(too_large)?;
            out.push_str(value).map_err(too_large)?;
        }
        out.push('}').map_err(too_large)?;
        Ok(out)
    }
}
