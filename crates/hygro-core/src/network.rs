//! WiFi link establishment with a bounded wait

use core::net::Ipv4Addr;

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use log::{debug, info};
use thiserror_no_std::Error;

use crate::config::InternetConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("WiFi link error: {reason}")]
pub struct LinkError {
    pub reason: &'static str,
}

impl LinkError {
    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no association after {waited_secs} s")]
    Timeout { waited_secs: u64 },
    #[error("{0}")]
    Link(LinkError),
}

/// Radio side of the WiFi station.
#[allow(async_fn_in_trait)]
pub trait WifiLink {
    /// Ask the radio to associate. Returns once the request is issued.
    async fn begin_connect(&mut self, credentials: &InternetConfig<'_>) -> Result<(), LinkError>;

    /// Associated and holding an address.
    async fn is_connected(&mut self) -> bool;

    fn address(&self) -> Option<Ipv4Addr> {
        None
    }
}

pub struct NetworkSession<W> {
    link: W,
}

impl<W: WifiLink> NetworkSession<W> {
    pub fn new(link: W) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &W {
        &self.link
    }

    pub async fn is_connected(&mut self) -> bool {
        self.link.is_connected().await
    }

    /// Associates with the configured network, polling once per second
    /// until connected or `connect_timeout` has passed. Succeeds at once when
    /// already connected.
    pub async fn connect<D: DelayNs>(
        &mut self,
        credentials: &InternetConfig<'_>,
        delay: &mut D,
    ) -> Result<(), NetworkError> {
        if self.link.is_connected().await {
            debug!("WiFi already connected");
            return Ok(());
        }

        info!("connecting to WiFi network '{}'", credentials.ssid);
        self.link
            .begin_connect(credentials)
            .await
            .map_err(NetworkError::Link)?;

        let mut waited = Duration::from_ticks(0);
        loop {
            if self.link.is_connected().await {
                match self.link.address() {
                    Some(addr) => info!("WiFi connected, address {}", addr),
                    None => info!("WiFi connected"),
                }
                return Ok(());
            }
            if waited >= credentials.connect_timeout {
                return Err(NetworkError::Timeout {
                    waited_secs: waited.as_secs(),
                });
            }
            delay.delay_ms(crate::duration_ms(POLL_INTERVAL)).await;
            waited += POLL_INTERVAL;
        }
    }
}
