// 设备模块 - 寄存器块解码与上报文档
// Per-device-class decoders and the JSON report published for each slave

pub mod energy_meter;
pub mod power_meter;
pub mod sensor;
pub mod voltage_meter;

pub use energy_meter::EnergyReading;
pub use power_meter::MeterReading;
pub use sensor::SensorReading;
pub use voltage_meter::VoltageReading;

use crate::codec;
use crate::types::{DeviceScales, Slave};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Register block too short: need {needed} values, got {got}")]
    ShortBlock { needed: usize, got: usize },
}

/// Slave identity fields leading every report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportHeader {
    pub id: u8,
    pub name: String,
    pub mqtt_topic: String,
    pub start_reg: u16,
    pub num_reg: u16,
    pub register_size: u8,
    pub ct: f32,
    pub pt: f32,
}

impl From<&Slave> for ReportHeader {
    fn from(slave: &Slave) -> Self {
        Self {
            id: slave.id,
            name: slave.name.clone(),
            mqtt_topic: slave.mqtt_topic.clone(),
            start_reg: slave.start_register,
            num_reg: slave.register_count,
            register_size: slave.register_size.into(),
            ct: slave.ct,
            pt: slave.pt,
        }
    }
}

/// Decoded channels, one variant per device class
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Channels {
    Sensor(SensorReading),
    PowerMeter(MeterReading),
    VoltageMeter(VoltageReading),
    EnergyMeter(EnergyReading),
}

/// Document published on the slave's topic after a successful exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(flatten)]
    pub header: ReportHeader,
    #[serde(flatten)]
    pub channels: Channels,
}

/// Document published on the slave's topic when an exchange fails
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub id: u8,
    pub name: String,
    pub error: String,
    pub mqtt_topic: String,
}

impl ErrorReport {
    pub fn new(slave: &Slave, error: impl Into<String>) -> Self {
        Self {
            id: slave.id,
            name: slave.name.clone(),
            error: error.into(),
            mqtt_topic: slave.mqtt_topic.clone(),
        }
    }
}

/// Combine `words` into logical values and decode them with the slave's scales
pub fn decode(slave: &Slave, words: &[u16]) -> Result<Report, DecodeError> {
    let device = slave.device_type();
    let size = slave.register_size;
    let values = codec::combine_all(words, size);
    if values.len() < device.required_values() {
        return Err(DecodeError::ShortBlock {
            needed: device.required_values(),
            got: values.len(),
        });
    }

    let channels = match &slave.scales {
        DeviceScales::Sensor(scales) => Channels::Sensor(sensor::decode(&values, size, scales)),
        DeviceScales::PowerMeter(scales) => {
            Channels::PowerMeter(power_meter::decode(&values, size, slave.ct, slave.pt, scales))
        }
        DeviceScales::VoltageMeter(scales) => {
            Channels::VoltageMeter(voltage_meter::decode(&values, slave.pt, scales))
        }
        DeviceScales::EnergyMeter(scales) => Channels::EnergyMeter(energy_meter::decode(&values, scales)),
    };

    Ok(Report {
        header: ReportHeader::from(slave),
        channels,
    })
}
