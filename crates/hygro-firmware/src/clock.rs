//! Wall clock for log lines and payloads
//!
//! Uptime comes from embassy-time. SNTP anchors it to UTC once the network
//! is up; until then timestamps count from 1970-01-01.

use core::cell::Cell;

use critical_section::Mutex;
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_sdmmc::{TimeSource, Timestamp};
use hygro_core::config::TimeConfig;
use hygro_core::sntp::{self, NTP_PORT, NtpTransport, PACKET_LEN, SntpError};
use hygro_core::time::ClockState;
use log::{info, warn};

const LOCAL_PORT: u16 = 50123;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const RESYNC_INTERVAL: Duration = Duration::from_secs(3600);
const RETRY_INTERVAL: Duration = Duration::from_secs(60);

static CLOCK: Mutex<Cell<ClockState>> = Mutex::new(Cell::new(ClockState::new(0)));

fn uptime_ms() -> u64 {
    Instant::now().as_millis()
}

/// Resets the clock with the configured UTC offset. Call once at boot.
pub fn init(utc_offset_secs: i32) {
    critical_section::with(|cs| CLOCK.borrow(cs).set(ClockState::new(utc_offset_secs)));
}

pub fn set_unix_time(unix_secs: u64) {
    let now = uptime_ms();
    critical_section::with(|cs| {
        let cell = CLOCK.borrow(cs);
        let mut state = cell.get();
        state.sync(unix_secs, now);
        cell.set(state);
    });
}

pub fn is_synced() -> bool {
    critical_section::with(|cs| CLOCK.borrow(cs).get().is_synced())
}

/// Handle onto the shared clock, cheap to copy into every consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn get_timestamp(&self) -> Timestamp {
        let state = critical_section::with(|cs| CLOCK.borrow(cs).get());
        state.timestamp(uptime_ms())
    }
}

/// SNTP over an embassy-net UDP socket.
pub struct UdpNtpTransport<'d> {
    stack: Stack<'d>,
    rx_meta: [PacketMetadata; 2],
    rx_buffer: [u8; 128],
    tx_meta: [PacketMetadata; 2],
    tx_buffer: [u8; 128],
}

impl<'d> UdpNtpTransport<'d> {
    pub fn new(stack: Stack<'d>) -> Self {
        Self {
            stack,
            rx_meta: [PacketMetadata::EMPTY; 2],
            rx_buffer: [0; 128],
            tx_meta: [PacketMetadata::EMPTY; 2],
            tx_buffer: [0; 128],
        }
    }
}

impl NtpTransport for UdpNtpTransport<'_> {
    async fn exchange(
        &mut self,
        server: &str,
        request: &[u8; PACKET_LEN],
        response: &mut [u8; PACKET_LEN],
    ) -> Result<usize, SntpError> {
        let addrs = self
            .stack
            .dns_query(server, DnsQueryType::A)
            .await
            .map_err(|_| SntpError::Dns("DNS query failed"))?;
        let addr: IpAddress = *addrs.first().ok_or(SntpError::Dns("no address"))?;

        let mut socket = UdpSocket::new(
            self.stack,
            &mut self.rx_meta,
            &mut self.rx_buffer,
            &mut self.tx_meta,
            &mut self.tx_buffer,
        );
        socket
            .bind(LOCAL_PORT)
            .map_err(|_| SntpError::Io("bind failed"))?;

        socket
            .send_to(request, (addr, NTP_PORT))
            .await
            .map_err(|_| SntpError::Io("send failed"))?;

        match with_timeout(REPLY_TIMEOUT, socket.recv_from(response)).await {
            Ok(Ok((len, _meta))) => Ok(len),
            Ok(Err(_)) => Err(SntpError::Io("receive failed")),
            Err(_) => Err(SntpError::Io("timed out")),
        }
    }
}

/// Syncs once the network has an address, then hourly. A failed round is
/// retried after a minute.
#[embassy_executor::task]
pub async fn time_sync_task(stack: Stack<'static>, config: TimeConfig<'static>) -> ! {
    let mut transport = UdpNtpTransport::new(stack);
    let mut delay = embassy_time::Delay;

    loop {
        stack.wait_config_up().await;

        let next = match sntp::sync(&mut transport, &config, &mut delay).await {
            Ok(outcome) => {
                set_unix_time(outcome.unix_secs);
                info!("clock: synced via {}", outcome.server);
                RESYNC_INTERVAL
            }
            Err(e) => {
                warn!("clock: {}, retrying in {}s", e, RETRY_INTERVAL.as_secs());
                RETRY_INTERVAL
            }
        };

        Timer::after(next).await;
    }
}
