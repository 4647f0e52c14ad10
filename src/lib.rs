// RTU 网关核心库
// Modbus-RTU polling gateway: register decoding, polling scheduler, MQTT publishing, admin surface

pub mod admin;
pub mod codec;
pub mod config;
pub mod core_loop;
pub mod debug_log;
pub mod devices;
pub mod drivers;
pub mod poll_engine;
pub mod registry;
pub mod stats;
pub mod storage;
pub mod templates;
pub mod types;

pub use core_loop::Gateway;
