#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, StackResources};
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::Input;
use esp_hal::timer::timg::TimerGroup;
use hygro_core::feedback::{Feedback, RotatingLog};
use hygro_core::network::NetworkSession;
use hygro_core::publisher::{PublishLoop, Station};
use hygro_core::sensors::SensorReader;
use hygro_firmware::clock::{self, SystemClock, time_sync_task};
use hygro_firmware::hardware::{create_i2c_bus, init_sd_card, status_led, stop_button};
use hygro_firmware::mqtt::{MqttBroker, MqttBuffers};
use hygro_firmware::secrets::CONFIG;
use hygro_firmware::sensor::Sht40Sensor;
use hygro_firmware::storage::SdCardLogStore;
use hygro_firmware::wifi::{EspWifiLink, net_task};
use log::{error, info, warn};
use rtt_target::rprintln;
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rprintln!("PANIC: {}", info);
    esp_hal::system::software_reset()
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Set by the BOOT button; the publish loop finishes its cycle and stops.
static STOP: AtomicBool = AtomicBool::new(false);

// DHCP, DNS, the MQTT TCP socket and the SNTP UDP socket
static STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static MQTT_BUFFERS: StaticCell<MqttBuffers> = StaticCell::new();

#[embassy_executor::task]
async fn stop_button_task(mut button: Input<'static>) {
    button.wait_for_falling_edge().await;
    info!("stop requested from button");
    STOP.store(true, Ordering::Relaxed);
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let config = CONFIG;

    rtt_target::rtt_init_log!(config.log.level);

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    clock::init(config.time.utc_offset_secs);
    info!("hygro booting, publishing to {}", config.broker.topic);

    if let Err(e) = config.validate() {
        error!("configuration invalid: {}. Set it in .env and rebuild.", e);
        loop {
            Timer::after(Duration::from_secs(3600)).await;
        }
    }

    // Peripherals
    let led = status_led(peripherals.GPIO2);
    let button = stop_button(peripherals.GPIO0);
    let i2c = create_i2c_bus(peripherals.I2C0, peripherals.GPIO12, peripherals.GPIO11);
    let sd_card = init_sd_card(
        peripherals.SPI2,
        peripherals.GPIO36,
        peripherals.GPIO37,
        peripherals.GPIO35,
        peripherals.GPIO4,
    );

    let mut sensor = Sht40Sensor::new(i2c);
    match sensor.probe().await {
        Ok(serial) => info!("SHT40 found, serial {:#010x}", serial),
        // Reads are retried every cycle, so a late sensor is not fatal
        Err(e) => warn!("SHT40 not responding at boot: {}", e),
    }

    // WiFi and the network stack
    let radio = RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(Default::default()),
        STACK_RESOURCES.init(StackResources::new()),
        Instant::now().as_ticks(),
    );

    spawner.spawn(net_task(runner).expect("net task"));
    spawner.spawn(time_sync_task(stack, config.time).expect("time sync task"));
    spawner.spawn(stop_button_task(button).expect("stop button task"));

    // Publish loop
    let log_store = SdCardLogStore::new(sd_card, SystemClock, config.log.file_name);
    let station = Station {
        reader: SensorReader::new(sensor, SystemClock),
        network: NetworkSession::new(EspWifiLink::new(wifi_controller, stack)),
        feedback: Feedback::new(led, RotatingLog::new(log_store, &config.log), SystemClock),
        delay: embassy_time::Delay,
    };
    let broker = MqttBroker::new(stack, config.broker, MQTT_BUFFERS.init(MqttBuffers::new()));

    let mut app = PublishLoop::new(&config, station, broker);
    let summary = app.run(&STOP).await;

    info!(
        "stopped: {} sessions, {} failed, {} published, clock synced: {}",
        summary.sessions,
        summary.failures,
        summary.published,
        clock::is_synced()
    );

    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}
