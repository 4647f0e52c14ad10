// 网关类型定义
// Shared data model: register layout, device classes, scale records and slave records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Number of consecutive holding registers that compose one logical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RegisterSize {
    #[default]
    W16 = 1,
    W32 = 2,
    W48 = 3,
    W64 = 4,
}

impl RegisterSize {
    /// Registers per logical value
    pub fn words(self) -> usize {
        self as usize
    }

    /// Width of the combined value in bits
    pub fn bits(self) -> u32 {
        16 * self as u32
    }
}

impl TryFrom<u8> for RegisterSize {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RegisterSize::W16),
            2 => Ok(RegisterSize::W32),
            3 => Ok(RegisterSize::W48),
            4 => Ok(RegisterSize::W64),
            other => Err(format!("register size must be 1..=4, got {}", other)),
        }
    }
}

impl From<RegisterSize> for u8 {
    fn from(size: RegisterSize) -> Self {
        size as u8
    }
}

/// Closed set of supported device classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Temperature / humidity sensor
    #[serde(rename = "G01S")]
    Sensor,
    /// Three-phase power meter (currents, powers, power factors)
    #[serde(rename = "HeylaParam")]
    PowerMeter,
    /// Line / phase voltage meter
    #[serde(rename = "HeylaVoltage")]
    VoltageMeter,
    /// Cumulative energy meter
    #[serde(rename = "HeylaEnergy")]
    EnergyMeter,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Sensor,
        DeviceType::PowerMeter,
        DeviceType::VoltageMeter,
        DeviceType::EnergyMeter,
    ];

    /// Template key used in `/templates.json` and the slave document
    pub fn type_name(self) -> &'static str {
        match self {
            DeviceType::Sensor => "G01S",
            DeviceType::PowerMeter => "HeylaParam",
            DeviceType::VoltageMeter => "HeylaVoltage",
            DeviceType::EnergyMeter => "HeylaEnergy",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_name() == name)
    }

    /// Top-level section of the template tree holding this class's scales
    pub fn section(self) -> &'static str {
        match self {
            DeviceType::Sensor => "sensor",
            DeviceType::PowerMeter => "meter",
            DeviceType::VoltageMeter => "voltage",
            DeviceType::EnergyMeter => "energy",
        }
    }

    /// Minimum number of logical values the decoder reads
    pub fn required_values(self) -> usize {
        match self {
            DeviceType::Sensor => 2,
            DeviceType::PowerMeter => 20,
            DeviceType::VoltageMeter => 5,
            DeviceType::EnergyMeter => 3,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Result of one Modbus exchange as seen by the statistics ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Timeout,
    Failure,
}

impl Outcome {
    /// Character stored in the rolling status history
    pub fn status_char(self) -> char {
        match self {
            Outcome::Success => 'S',
            Outcome::Timeout => 'T',
            Outcome::Failure => 'F',
        }
    }
}

/// Per-channel scaling. CT/PT live on the slave, only the divider is per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleParam {
    #[serde(default = "unit_scale")]
    pub divider: f32,
}

fn unit_scale() -> f32 {
    1.0
}

impl ScaleParam {
    pub const fn new(divider: f32) -> Self {
        Self { divider }
    }
}

impl Default for ScaleParam {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorScales {
    #[serde(rename = "tempdivider")]
    pub temp_divider: f32,
    #[serde(rename = "humiddivider")]
    pub humid_divider: f32,
}

impl Default for SensorScales {
    fn default() -> Self {
        Self {
            temp_divider: 1.0,
            humid_divider: 1.0,
        }
    }
}

/// Twenty-channel power meter layout, in register order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeterScales {
    pub a_current: ScaleParam,
    pub b_current: ScaleParam,
    pub c_current: ScaleParam,
    pub zero_phase_current: ScaleParam,
    pub a_active_power: ScaleParam,
    pub b_active_power: ScaleParam,
    pub c_active_power: ScaleParam,
    pub total_active_power: ScaleParam,
    pub a_reactive_power: ScaleParam,
    pub b_reactive_power: ScaleParam,
    pub c_reactive_power: ScaleParam,
    pub total_reactive_power: ScaleParam,
    pub a_apparent_power: ScaleParam,
    pub b_apparent_power: ScaleParam,
    pub c_apparent_power: ScaleParam,
    pub total_apparent_power: ScaleParam,
    pub a_power_factor: ScaleParam,
    pub b_power_factor: ScaleParam,
    pub c_power_factor: ScaleParam,
    pub total_power_factor: ScaleParam,
}

impl MeterScales {
    /// Divider applied to single-phase power channels (W -> kW)
    pub const PHASE_POWER_DIVIDER: f32 = 1000.0;
    /// Divider applied to three-phase total power channels
    pub const TOTAL_POWER_DIVIDER: f32 = 10000.0;
}

impl Default for MeterScales {
    fn default() -> Self {
        let unit = ScaleParam::default();
        let phase = ScaleParam::new(Self::PHASE_POWER_DIVIDER);
        let total = ScaleParam::new(Self::TOTAL_POWER_DIVIDER);
        Self {
            a_current: unit,
            b_current: unit,
            c_current: unit,
            zero_phase_current: unit,
            a_active_power: phase,
            b_active_power: phase,
            c_active_power: phase,
            total_active_power: total,
            a_reactive_power: phase,
            b_reactive_power: phase,
            c_reactive_power: phase,
            total_reactive_power: total,
            a_apparent_power: phase,
            b_apparent_power: phase,
            c_apparent_power: phase,
            total_apparent_power: total,
            a_power_factor: unit,
            b_power_factor: unit,
            c_power_factor: unit,
            total_power_factor: unit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoltageScales {
    pub a_voltage: ScaleParam,
    pub b_voltage: ScaleParam,
    pub c_voltage: ScaleParam,
    pub phase_voltage_mean: ScaleParam,
    pub zero_sequence_voltage: ScaleParam,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnergyScales {
    pub total_active_energy: ScaleParam,
    pub import_active_energy: ScaleParam,
    pub export_active_energy: ScaleParam,
}

/// Device-specific scale record; the variant is the device type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceScales {
    Sensor(SensorScales),
    PowerMeter(MeterScales),
    VoltageMeter(VoltageScales),
    EnergyMeter(EnergyScales),
}

impl DeviceScales {
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceScales::Sensor(_) => DeviceType::Sensor,
            DeviceScales::PowerMeter(_) => DeviceType::PowerMeter,
            DeviceScales::VoltageMeter(_) => DeviceType::VoltageMeter,
            DeviceScales::EnergyMeter(_) => DeviceType::EnergyMeter,
        }
    }

    /// Every divider in the record, labelled for validation messages
    pub fn dividers(&self) -> Vec<(&'static str, f32)> {
        match self {
            DeviceScales::Sensor(s) => vec![
                ("tempdivider", s.temp_divider),
                ("humiddivider", s.humid_divider),
            ],
            DeviceScales::PowerMeter(m) => vec![
                ("aCurrent", m.a_current.divider),
                ("bCurrent", m.b_current.divider),
                ("cCurrent", m.c_current.divider),
                ("zeroPhaseCurrent", m.zero_phase_current.divider),
                ("aActivePower", m.a_active_power.divider),
                ("bActivePower", m.b_active_power.divider),
                ("cActivePower", m.c_active_power.divider),
                ("totalActivePower", m.total_active_power.divider),
                ("aReactivePower", m.a_reactive_power.divider),
                ("bReactivePower", m.b_reactive_power.divider),
                ("cReactivePower", m.c_reactive_power.divider),
                ("totalReactivePower", m.total_reactive_power.divider),
                ("aApparentPower", m.a_apparent_power.divider),
                ("bApparentPower", m.b_apparent_power.divider),
                ("cApparentPower", m.c_apparent_power.divider),
                ("totalApparentPower", m.total_apparent_power.divider),
                ("aPowerFactor", m.a_power_factor.divider),
                ("bPowerFactor", m.b_power_factor.divider),
                ("cPowerFactor", m.c_power_factor.divider),
                ("totalPowerFactor", m.total_power_factor.divider),
            ],
            DeviceScales::VoltageMeter(v) => vec![
                ("aVoltage", v.a_voltage.divider),
                ("bVoltage", v.b_voltage.divider),
                ("cVoltage", v.c_voltage.divider),
                ("phaseVoltageMean", v.phase_voltage_mean.divider),
                ("zeroSequenceVoltage", v.zero_sequence_voltage.divider),
            ],
            DeviceScales::EnergyMeter(e) => vec![
                ("totalActiveEnergy", e.total_active_energy.divider),
                ("importActiveEnergy", e.import_active_energy.divider),
                ("exportActiveEnergy", e.export_active_energy.divider),
            ],
        }
    }
}

/// A materialised slave, built from `template ⊕ override` at reload
#[derive(Debug, Clone, PartialEq)]
pub struct Slave {
    /// Modbus unit ID, 1..=247
    pub id: u8,
    pub start_register: u16,
    pub register_count: u16,
    pub name: String,
    pub mqtt_topic: String,
    pub register_size: RegisterSize,
    /// Current transformer ratio
    pub ct: f32,
    /// Potential transformer ratio
    pub pt: f32,
    pub scales: DeviceScales,
}

impl Slave {
    pub fn device_type(&self) -> DeviceType {
        self.scales.device_type()
    }

    /// Number of logical values the decoder produces
    pub fn value_count(&self) -> usize {
        self.register_count as usize / self.register_size.words()
    }
}

/// One entry of `/slaves.json` as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveRecord {
    pub id: u8,
    pub name: String,
    pub device_type: String,
    pub start_reg: u16,
    pub num_reg: u16,
    pub mqtt_topic: String,
    #[serde(default = "default_register_size")]
    pub register_size: u8,
    #[serde(default = "unit_scale")]
    pub ct: f32,
    #[serde(default = "unit_scale")]
    pub pt: f32,
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Map<String, Value>>,
}

fn default_register_size() -> u8 {
    1
}

impl SlaveRecord {
    /// Keys that describe the slave itself rather than its parameter tree
    pub const BASIC_FIELDS: [&'static str; 9] = [
        "id",
        "name",
        "deviceType",
        "startReg",
        "numReg",
        "mqttTopic",
        "registerSize",
        "ct",
        "pt",
    ];
}

/// `/slaves.json`. Entries stay raw so that one malformed slave cannot hide the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaveDocument {
    #[serde(default)]
    pub slaves: Vec<Value>,
}

/// `/polling.json`, both values in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    1
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
        }
    }
}

impl PollingConfig {
    /// Longest accepted poll interval, one day
    pub const MAX_POLL_INTERVAL: u64 = 86_400;
    /// Longest accepted response timeout, one hour
    pub const MAX_TIMEOUT: u64 = 3_600;

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval.saturating_mul(1000)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.saturating_mul(1000)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval == 0 {
            return Err("pollInterval must be at least 1 second".to_string());
        }
        if self.poll_interval > Self::MAX_POLL_INTERVAL {
            return Err(format!(
                "pollInterval must be at most {} seconds",
                Self::MAX_POLL_INTERVAL
            ));
        }
        if self.timeout == 0 {
            return Err("timeout must be at least 1 second".to_string());
        }
        if self.timeout > Self::MAX_TIMEOUT {
            return Err(format!("timeout must be at most {} seconds", Self::MAX_TIMEOUT));
        }
        Ok(())
    }
}

/// Network credentials and broker endpoint (`/network.json`). Opaque to the poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub sta_ssid: String,
    pub sta_password: String,
    pub ap_ssid: String,
    pub ap_password: String,
    pub mqtt_server: String,
    pub mqtt_port: u16,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            sta_ssid: String::new(),
            sta_password: String::new(),
            ap_ssid: "rtu-gateway".to_string(),
            ap_password: String::new(),
            mqtt_server: "127.0.0.1".to_string(),
            mqtt_port: 1883,
        }
    }
}
