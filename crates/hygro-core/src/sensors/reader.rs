use alloc::format;

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_sdmmc::TimeSource;
use log::debug;

use super::{Sensor, SensorError};
use crate::config::SamplingConfig;
use crate::feedback::FeedbackSink;
use crate::reading::Reading;
use crate::time::iso8601;

/// How hard to try for one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub retry_delay: Duration,
}

impl From<&SamplingConfig> for RetryPolicy {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        }
    }
}

/// Counters since boot or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStatistics {
    /// `read()` calls
    pub total_reads: u32,
    /// `read()` calls that ran out of attempts
    pub errors: u32,
    /// Individual failed attempts, retried or not
    pub failed_attempts: u32,
}

impl ReaderStatistics {
    /// Share of successful `read()` calls in percent, 0 when nothing was read.
    pub fn success_rate(&self) -> f32 {
        if self.total_reads == 0 {
            return 0.0;
        }
        (self.total_reads - self.errors) as f32 * 100.0 / self.total_reads as f32
    }
}

/// Retrying, validating front end for a [`Sensor`].
pub struct SensorReader<S, C> {
    sensor: S,
    clock: C,
    stats: ReaderStatistics,
    last: Option<Reading>,
}

impl<S, C> SensorReader<S, C>
where
    S: Sensor,
    C: TimeSource,
{
    pub fn new(sensor: S, clock: C) -> Self {
        Self {
            sensor,
            clock,
            stats: ReaderStatistics::default(),
            last: None,
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn statistics(&self) -> ReaderStatistics {
        self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = ReaderStatistics::default();
    }

    pub fn last_reading(&self) -> Option<&Reading> {
        self.last.as_ref()
    }

    /// Takes one validated reading, trying up to `policy.max_attempts` times.
    ///
    /// Out-of-range values count as a failed attempt. The backoff sleep only
    /// happens between attempts, never after the last one. The LED is off
    /// while sampling and lit again on success.
    pub async fn read<F, D>(
        &mut self,
        policy: RetryPolicy,
        feedback: &mut F,
        delay: &mut D,
    ) -> Result<Reading, SensorError>
    where
        F: FeedbackSink,
        D: DelayNs,
    {
        let attempts = policy.max_attempts.max(1);
        self.stats.total_reads += 1;

        let mut attempt = 1;
        loop {
            feedback.indicate(false);

            let outcome = match self.sensor.measure().await {
                Ok(measurement) => {
                    Reading::new(measurement, iso8601(&self.clock.get_timestamp()))
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(reading) => {
                    debug!(
                        "read {:.1} °C / {:.1} % on attempt {}",
                        reading.temperature(),
                        reading.humidity(),
                        attempt
                    );
                    self.last = Some(reading.clone());
                    feedback.indicate(true);
                    return Ok(reading);
                }
                Err(e) if attempt < attempts => {
                    self.stats.failed_attempts += 1;
                    debug!("sensor attempt {}/{} failed: {}", attempt, attempts, e);
                    delay.delay_ms(crate::duration_ms(policy.retry_delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.stats.failed_attempts += 1;
                    self.stats.errors += 1;
                    feedback.indicate(false);
                    feedback.error(&format!(
                        "sensor read failed after {} attempts: {}",
                        attempts, e
                    ));
                    return Err(e);
                }
            }
        }
    }
}
