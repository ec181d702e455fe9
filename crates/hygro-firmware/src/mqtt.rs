//! rust-mqtt (MQTT v5) over an embassy-net TCP socket
//!
//! Every session gets a fresh socket and client built on the same static
//! buffers, so a broken connection never leaks state into the next session.

use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};
use hygro_core::broker::{Broker, BrokerError, BrokerSession, MqQos};
use hygro_core::config::BrokerConfig;
use log::{error, info};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;
use smoltcp::wire::Ipv4Address;

const TCP_BUFFER_LEN: usize = 1024;
const MQTT_BUFFER_LEN: usize = 512;
const MAX_PROPERTIES: usize = 5;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket and packet buffers, kept in a `StaticCell`.
pub struct MqttBuffers {
    tcp_rx: [u8; TCP_BUFFER_LEN],
    tcp_tx: [u8; TCP_BUFFER_LEN],
    mqtt_rx: [u8; MQTT_BUFFER_LEN],
    mqtt_tx: [u8; MQTT_BUFFER_LEN],
}

impl MqttBuffers {
    pub const fn new() -> Self {
        Self {
            tcp_rx: [0; TCP_BUFFER_LEN],
            tcp_tx: [0; TCP_BUFFER_LEN],
            mqtt_rx: [0; MQTT_BUFFER_LEN],
            mqtt_tx: [0; MQTT_BUFFER_LEN],
        }
    }
}

impl Default for MqttBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a TCP socket to the embedded-io-async traits rust-mqtt expects.
pub struct EmbassyNetTransport<'a> {
    socket: TcpSocket<'a>,
}

impl ErrorType for EmbassyNetTransport<'_> {
    type Error = embassy_net::tcp::Error;
}

impl Read for EmbassyNetTransport<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await
    }
}

impl Write for EmbassyNetTransport<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await
    }
}

pub struct MqttBroker<'d> {
    stack: Stack<'d>,
    config: BrokerConfig<'static>,
    buffers: &'d mut MqttBuffers,
}

impl<'d> MqttBroker<'d> {
    pub fn new(stack: Stack<'d>, config: BrokerConfig<'static>, buffers: &'d mut MqttBuffers) -> Self {
        Self {
            stack,
            config,
            buffers,
        }
    }

    /// Accepts an IPv4 literal, otherwise asks DNS.
    async fn resolve(&self) -> Result<Ipv4Address, BrokerError> {
        if let Ok(ip) = self.config.host.parse::<Ipv4Address>() {
            return Ok(ip);
        }

        let addrs = self
            .stack
            .dns_query(self.config.host, DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("mqtt: DNS lookup of '{}' failed: {:?}", self.config.host, e);
                BrokerError::Resolve {
                    reason: "DNS query failed",
                }
            })?;

        match addrs.first() {
            Some(embassy_net::IpAddress::Ipv4(ip)) => {
                info!("mqtt: resolved '{}' to {}", self.config.host, ip);
                Ok(*ip)
            }
            _ => Err(BrokerError::Resolve {
                reason: "no IPv4 address",
            }),
        }
    }
}

pub struct MqttSession<'s> {
    client: MqttClient<'s, EmbassyNetTransport<'s>, MAX_PROPERTIES, CountingRng>,
}

impl<'d> Broker for MqttBroker<'d> {
    type Session<'s>
        = MqttSession<'s>
    where
        Self: 's;

    async fn connect(&mut self) -> Result<MqttSession<'_>, BrokerError> {
        let addr = self.resolve().await?;
        let config = self.config;
        let MqttBuffers {
            tcp_rx,
            tcp_tx,
            mqtt_rx,
            mqtt_tx,
        } = &mut *self.buffers;

        let mut socket = TcpSocket::new(self.stack, tcp_rx, tcp_tx);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        info!("mqtt: connecting TCP to {}:{}", addr, config.port);
        socket.connect((addr, config.port)).await.map_err(|e| {
            error!("mqtt: TCP connect failed: {:?}", e);
            BrokerError::Connect {
                reason: "TCP connection failed",
            }
        })?;

        let mut client_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
        client_config.add_client_id(config.client_id);
        client_config.keep_alive = config.keep_alive_secs;
        if let Some(username) = config.username {
            client_config.add_username(username);
        }
        if let Some(password) = config.password {
            client_config.add_password(password);
        }

        let rx_len = mqtt_rx.len();
        let tx_len = mqtt_tx.len();
        let mut client = MqttClient::<_, MAX_PROPERTIES, _>::new(
            EmbassyNetTransport { socket },
            mqtt_tx,
            tx_len,
            mqtt_rx,
            rx_len,
            client_config,
        );

        client.connect_to_broker().await.map_err(|e| {
            let reason = interpret_connack_reason(&e);
            error!("mqtt: CONNECT refused: {} ({:?})", reason, e);
            BrokerError::Connect { reason }
        })?;

        info!("mqtt: connected as '{}'", config.client_id);
        Ok(MqttSession { client })
    }
}

impl BrokerSession for MqttSession<'_> {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<(), BrokerError> {
        let mqtt_qos = match qos {
            MqQos::AtMostOnce => QualityOfService::QoS0,
            MqQos::AtLeastOnce => QualityOfService::QoS1,
        };

        match self.client.send_message(topic, payload, mqtt_qos, retain).await {
            // Delivered, just nobody listening
            Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => Ok(()),
            Err(e) => {
                error!("mqtt: publish to '{}' failed: {:?}", topic, e);
                Err(BrokerError::Publish {
                    reason: interpret_connack_reason(&e),
                })
            }
        }
    }

    async fn disconnect(mut self) -> Result<(), BrokerError> {
        self.client.disconnect().await.map_err(|e| BrokerError::Disconnect {
            reason: interpret_connack_reason(&e),
        })
    }
}

/// Human-readable text for an MQTT v5 reason code.
pub fn interpret_connack_reason(reason: &ReasonCode) -> &'static str {
    match *reason {
        ReasonCode::Success => "Success",
        ReasonCode::UnspecifiedError => "Unspecified error",
        ReasonCode::MalformedPacket => "Malformed packet",
        ReasonCode::ProtocolError => "Protocol error",
        ReasonCode::ImplementationSpecificError => "Implementation specific error",
        ReasonCode::UnsupportedProtocolVersion => "Unsupported protocol version",
        ReasonCode::ClientIdNotValid => "Client identifier not valid",
        ReasonCode::BadUserNameOrPassword => "Bad username or password",
        ReasonCode::NotAuthorized => "Not authorized",
        ReasonCode::ServerUnavailable => "Server unavailable",
        ReasonCode::ServerBusy => "Server busy",
        ReasonCode::Banned => "Client banned",
        ReasonCode::TopicNameInvalid => "Topic name invalid",
        ReasonCode::PacketTooLarge => "Packet too large",
        ReasonCode::QuotaExceeded => "Quota exceeded",
        ReasonCode::PayloadFormatInvalid => "Payload format invalid",
        ReasonCode::NetworkError => "Network error",
        _ => "Unknown reason code",
    }
}
