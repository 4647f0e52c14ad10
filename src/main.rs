// RTU 网关主入口
// Loads configuration, opens the serial line and the broker session, then runs the scheduler

use anyhow::Context;
use log::info;
use rtu_gateway::admin::AdminServer;
use rtu_gateway::config::GatewayConfig;
use rtu_gateway::drivers::cloud::{MqttConfig, MqttPublisher};
use rtu_gateway::drivers::link::HostLink;
use rtu_gateway::drivers::modbus::{ModbusDriver, SerialPortLine};
use rtu_gateway::storage::{load_network_params, FsConfigStore};
use rtu_gateway::Gateway;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("RTU gateway starting...");

    let config = GatewayConfig::load(std::env::args_os().nth(1).map(PathBuf::from))
        .context("Failed to load gateway configuration")?;
    let store = FsConfigStore::open(&config.data_dir)
        .with_context(|| format!("Failed to open data directory {}", config.data_dir.display()))?;
    let network = load_network_params(&store).context("Failed to read network settings")?;

    let publisher = MqttPublisher::connect(MqttConfig {
        broker: network.mqtt_server.clone(),
        port: network.mqtt_port,
        client_id: config.mqtt.client_id.clone(),
        keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
        reconnect_interval: Duration::from_secs(config.mqtt.reconnect_secs),
        ..MqttConfig::default()
    })
    .context("Failed to create MQTT client")?;

    let line = SerialPortLine::open(&config.serial.port, config.serial.baud_rate, config.serial.de_via_rts)
        .with_context(|| format!("Failed to open serial port {}", config.serial.port))?;
    info!(
        "Modbus RTU on {} @ {} baud",
        config.serial.port, config.serial.baud_rate
    );

    let admin = AdminServer::bind(&config.http_bind)?;
    let mut gateway = Gateway::new(
        Box::new(store),
        ModbusDriver::new(line),
        publisher,
        Box::new(HostLink::new(network)),
        &config,
    )
    .with_admin(admin);

    let report = gateway.start().context("Failed to load slave registry")?;
    info!(
        "Gateway ready: {} slaves, {} skipped",
        report.loaded,
        report.skipped.len()
    );

    let epoch = Instant::now();
    let tick_sleep = config.tick_sleep();
    loop {
        let now_ms = epoch.elapsed().as_millis() as u64;
        gateway.tick(now_ms);
        thread::sleep(tick_sleep);
    }
}
