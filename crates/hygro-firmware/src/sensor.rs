//! SHT40 adapter for the core [`Sensor`] trait

use embedded_hal_async::i2c::I2c;
use hygro_core::sensors::{Measurement, Sensor, SensorError};
use sht4x::Sht4xAsync;

pub struct Sht40Sensor<I> {
    sensor: Sht4xAsync<I, embassy_time::Delay>,
}

impl<I: I2c> Sht40Sensor<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: Sht4xAsync::<I, embassy_time::Delay>::new(i2c),
        }
    }

    /// Reads the serial number to confirm the sensor answers on the bus.
    pub async fn probe(&mut self) -> Result<u32, SensorError> {
        self.sensor
            .serial_number(&mut embassy_time::Delay)
            .await
            .map_err(|e| {
                log::error!("SHT40 serial number read failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "read serial number",
                    details: "no acknowledgement at address 0x44",
                }
            })
    }
}

impl<I: I2c> Sensor for Sht40Sensor<I> {
    async fn measure(&mut self) -> Result<Measurement, SensorError> {
        let measurement = self
            .sensor
            .measure(sht4x::Precision::High, &mut embassy_time::Delay)
            .await
            .map_err(|e| {
                log::error!("SHT40 measurement failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "measure temperature/humidity",
                    details: "I2C communication error or sensor not responding",
                }
            })?;

        Ok(Measurement::new(
            measurement.temperature_celsius().to_num::<f32>(),
            measurement.humidity_percent().to_num::<f32>(),
        ))
    }
}
