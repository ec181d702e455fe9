//! Minimal SNTP client logic
//!
//! Packet building and parsing plus the server/retry walk. Socket handling is
//! left to an [`NtpTransport`] so this stays testable off-device.

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::TimeConfig;

pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;

/// Seconds from 1900-01-01 to 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SntpError {
    #[error("reply too short ({0} bytes)")]
    Truncated(usize),
    #[error("reply is not a server response (mode {0})")]
    UnexpectedMode(u8),
    #[error("server sent kiss-of-death")]
    KissOfDeath,
    #[error("reply carries no transmit time")]
    MissingTimestamp,
    #[error("transmit time {0} is before 1970")]
    BeforeEpoch(u32),
    #[error("could not resolve {0}")]
    Dns(&'static str),
    #[error("no reply: {0}")]
    Io(&'static str),
    #[error("no server answered")]
    AllServersFailed,
}

/// One request/response round trip with a named server.
#[allow(async_fn_in_trait)]
pub trait NtpTransport {
    /// Sends `request` to `server` and fills `response`, returning the
    /// number of bytes received.
    async fn exchange(
        &mut self,
        server: &str,
        request: &[u8; PACKET_LEN],
        response: &mut [u8; PACKET_LEN],
    ) -> Result<usize, SntpError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome<'a> {
    pub unix_secs: u64,
    pub server: &'a str,
}

pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    // LI = 0, VN = 3, Mode = 3
    packet[0] = (VERSION << 3) | MODE_CLIENT;
    packet
}

/// Extracts the server transmit time as Unix seconds.
pub fn parse_response(reply: &[u8]) -> Result<u64, SntpError> {
    if reply.len() < PACKET_LEN {
        return Err(SntpError::Truncated(reply.len()));
    }
    let mode = reply[0] & 0x07;
    if mode != MODE_SERVER {
        return Err(SntpError::UnexpectedMode(mode));
    }
    if reply[1] == 0 {
        return Err(SntpError::KissOfDeath);
    }

    let seconds = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]);
    if seconds == 0 {
        return Err(SntpError::MissingTimestamp);
    }

    // Era 1 starts in 2036; values with the top bit clear belong to it.
    let mut ntp_secs = u64::from(seconds);
    if seconds & 0x8000_0000 == 0 {
        ntp_secs += 1 << 32;
    }
    ntp_secs
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(SntpError::BeforeEpoch(seconds))
}

/// Walks `config.servers` in order, giving each up to
/// `attempts_per_server` tries with `retry_delay` between them.
pub async fn sync<'a, T, D>(
    transport: &mut T,
    config: &TimeConfig<'a>,
    delay: &mut D,
) -> Result<SyncOutcome<'a>, SntpError>
where
    T: NtpTransport,
    D: DelayNs,
{
    let request = request();
    let attempts = config.attempts_per_server.max(1);

    for &server in config.servers {
        for attempt in 1..=attempts {
            let mut response = [0u8; PACKET_LEN];
            let result = match transport.exchange(server, &request, &mut response).await {
                Ok(len) => parse_response(&response[..len.min(PACKET_LEN)]),
                Err(e) => Err(e),
            };

            match result {
                Ok(unix_secs) => {
                    info!("time synced from {} ({})", server, unix_secs);
                    return Ok(SyncOutcome { unix_secs, server });
                }
                Err(e) => {
                    warn!("{} attempt {}/{}: {}", server, attempt, attempts, e);
                    if attempt < attempts {
                        delay.delay_ms(crate::duration_ms(config.retry_delay)).await;
                    }
                }
            }
        }
    }

    Err(SntpError::AllServersFailed)
}
