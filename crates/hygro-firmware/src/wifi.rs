//! esp-radio station mode behind the core [`WifiLink`] trait

use alloc::string::ToString;
use core::net::Ipv4Addr;

use embassy_net::{Runner, Stack};
use esp_radio::wifi::{ClientConfig, ModeConfig, PowerSaveMode, WifiController, WifiDevice};
use hygro_core::config::InternetConfig;
use hygro_core::network::{LinkError, WifiLink};
use log::{error, warn};

pub struct EspWifiLink<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
    configured: bool,
}

impl<'d> EspWifiLink<'d> {
    pub fn new(controller: WifiController<'d>, stack: Stack<'d>) -> Self {
        Self {
            controller,
            stack,
            configured: false,
        }
    }

    fn configure(&mut self, credentials: &InternetConfig<'_>) -> Result<(), LinkError> {
        let client = ClientConfig::default()
            .with_ssid(credentials.ssid.to_string())
            .with_password(credentials.password.to_string());

        self.controller
            .set_config(&ModeConfig::Client(client))
            .map_err(|e| {
                error!("wifi: set_config failed: {:?}", e);
                LinkError::new("station configuration rejected")
            })?;

        // Keep the radio awake, a sleeping station misses broker traffic
        if let Err(e) = self.controller.set_power_saving(PowerSaveMode::None) {
            warn!("wifi: could not disable power saving: {:?}", e);
        }

        self.configured = true;
        Ok(())
    }
}

impl WifiLink for EspWifiLink<'_> {
    async fn begin_connect(&mut self, credentials: &InternetConfig<'_>) -> Result<(), LinkError> {
        if !self.configured {
            self.configure(credentials)?;
        }

        if !self.controller.is_started().unwrap_or(false) {
            self.controller.start().map_err(|e| {
                error!("wifi: start failed: {:?}", e);
                LinkError::new("radio failed to start")
            })?;
        }

        self.controller.connect().map_err(|e| {
            error!("wifi: connect request failed: {:?}", e);
            LinkError::new("connect request rejected")
        })
    }

    async fn is_connected(&mut self) -> bool {
        self.controller.is_connected().unwrap_or(false) && self.stack.is_config_up()
    }

    fn address(&self) -> Option<Ipv4Addr> {
        self.stack
            .config_v4()
            .map(|config| config.address.address())
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}
