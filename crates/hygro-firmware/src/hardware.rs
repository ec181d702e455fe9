//! Peripheral setup for the hygro board
//!
//! Pin map (ESP32-S3 DevKit with breakouts):
//! - SHT40 on I2C0: SDA GPIO12, SCL GPIO11
//! - microSD on SPI2: SCK GPIO36, MOSI GPIO37, MISO GPIO35, CS GPIO4
//! - status LED on GPIO2 (active high)
//! - BOOT button on GPIO0 requests a stop

use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::Blocking;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;

pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, embassy_time::Delay>;
pub type SdCardDevice = SdCard<SdSpi, embassy_time::Delay>;

/// Creates the async I2C bus for the sensor
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO12<'static>,
    scl: esp_hal::peripherals::GPIO11<'static>,
) -> I2c<'static, esp_hal::Async> {
    // SHT4x tolerates fast mode
    I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .unwrap()
    .with_sda(sda)
    .with_scl(scl)
    .into_async()
}

/// Sets up SPI2 and wraps it as an SD card. The card itself is probed
/// lazily on first access, so a missing card only costs log lines.
pub fn init_sd_card(
    spi2: esp_hal::peripherals::SPI2<'static>,
    sck: esp_hal::peripherals::GPIO36<'static>,
    mosi: esp_hal::peripherals::GPIO37<'static>,
    miso: esp_hal::peripherals::GPIO35<'static>,
    cs: esp_hal::peripherals::GPIO4<'static>,
) -> SdCardDevice {
    // Cards must be initialised at no more than 400 kHz
    let spi = Spi::new(spi2, SpiConfig::default().with_frequency(Rate::from_khz(400)))
        .unwrap()
        .with_sck(sck)
        .with_mosi(mosi)
        .with_miso(miso);
    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let device = ExclusiveDevice::new(spi, cs, embassy_time::Delay).unwrap();

    SdCard::new(device, embassy_time::Delay)
}

pub fn status_led(pin: esp_hal::peripherals::GPIO2<'static>) -> Output<'static> {
    Output::new(pin, Level::Low, OutputConfig::default())
}

pub fn stop_button(pin: esp_hal::peripherals::GPIO0<'static>) -> Input<'static> {
    Input::new(pin, InputConfig::default().with_pull(Pull::Up))
}
