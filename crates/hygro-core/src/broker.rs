//! MQTT broker seam
//!
//! The loop only needs to open a session, publish into it and close it. The
//! firmware backs this with rust-mqtt over embassy-net; tests and the
//! simulator use in-memory stand-ins.

use thiserror_no_std::Error;

/// MQTT QoS for a plain publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MqQos {
    /// QoS 0
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
}

impl MqQos {
    pub const fn as_str(self) -> &'static str {
        match self {
            MqQos::AtMostOnce => "QoS0",
            MqQos::AtLeastOnce => "QoS1",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker address could not be resolved: {reason}")]
    Resolve { reason: &'static str },
    #[error("connection refused: {reason}")]
    Connect { reason: &'static str },
    #[error("publish failed: {reason}")]
    Publish { reason: &'static str },
    #[error("disconnect failed: {reason}")]
    Disconnect { reason: &'static str },
}

/// Something that can open broker sessions.
#[allow(async_fn_in_trait)]
pub trait Broker {
    type Session<'s>: BrokerSession
    where
        Self: 's;

    /// Open the transport and complete the MQTT handshake.
    async fn connect(&mut self) -> Result<Self::Session<'_>, BrokerError>;
}

/// A live, connected broker session.
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<(), BrokerError>;

    /// Close the session. Consumes it whether or not the broker acknowledged.
    async fn disconnect(self) -> Result<(), BrokerError>;
}
