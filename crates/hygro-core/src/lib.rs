//! Hardware-independent core for hygro
//!
//! Everything needed to sample a temperature/humidity sensor, validate the
//! reading and publish it to an MQTT broker lives here, behind small traits
//! for the hardware pieces (sensor, WiFi link, broker client, clock, log
//! storage). The ESP32-S3 firmware and the desktop simulator both drive the
//! same [`publisher::PublishLoop`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod broker;
pub mod config;
pub mod feedback;
pub mod network;
pub mod publisher;
pub mod reading;
pub mod sensors;
pub mod sntp;
pub mod time;

#[cfg(test)]
mod testing;

/// Converts a duration into the millisecond count taken by `DelayNs::delay_ms`.
pub(crate) fn duration_ms(duration: embassy_time::Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
