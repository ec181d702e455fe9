//! Run states, per-session counters and the session failure taxonomy

use thiserror_no_std::Error;

use crate::broker::BrokerError;
use crate::network::NetworkError;
use crate::reading::PayloadError;
use crate::sensors::SensorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Connecting,
    Running,
    Teardown,
    RestartDelay,
    Stopped,
}

/// Counters for one connect..teardown session. Reset on every restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub connected: bool,
    /// WiFi reconnects attempted inside this session
    pub retry_count: u32,
    /// Cycles whose sensor read failed
    pub error_count: u32,
    pub published: u32,
}

/// Totals across all sessions, returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sessions: u32,
    /// Sessions that ended in an error
    pub failures: u32,
    pub published: u32,
}

/// Why a session ended early.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("WiFi connection failed: {0}")]
    Network(NetworkError),
    #[error("broker connection failed: {0}")]
    Broker(BrokerError),
    #[error("WiFi reconnect failed: {0}")]
    Reconnect(NetworkError),
    #[error("{0}")]
    Publish(BrokerError),
    #[error("could not encode reading: {0}")]
    Payload(PayloadError),
}

/// How a failure is handled.
///
/// Sensor faults are retried inside the reader and never end a session.
/// Connectivity and publish faults end the session, which restarts after the
/// configured delay. Panics are fatal and reset the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TransientSensor,
    Connectivity,
    Publish,
}

impl AppError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            AppError::Network(_) | AppError::Broker(_) | AppError::Reconnect(_) => {
                FailureKind::Connectivity
            }
            AppError::Publish(_) | AppError::Payload(_) => FailureKind::Publish,
        }
    }
}

impl SensorError {
    pub const fn kind(&self) -> FailureKind {
        FailureKind::TransientSensor
    }
}
