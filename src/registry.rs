// 从站注册表
// Ordered list of materialised slaves, rebuilt atomically from the config store

use crate::drivers::modbus::MAX_READ_COUNT;
use crate::storage::{load_polling_config, load_slave_document, ConfigStore, StoreError};
use crate::templates::{merge, Document, TemplateError, TemplateStore};
use crate::types::{
    DeviceScales, DeviceType, PollingConfig, RegisterSize, Slave, SlaveRecord,
};
use log::{info, warn};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::rc::Rc;
use thiserror::Error;

/// Highest unit ID a slave may use
pub const MAX_SLAVE_ID: u8 = 247;

/// Why one slave entry was left out of a reload
#[derive(Error, Debug)]
pub enum SlaveRejected {
    #[error("malformed entry: {0}")]
    Malformed(String),
    #[error("unknown device type '{0}'")]
    UnknownDeviceType(String),
    #[error("slave id {0} outside 1..=247")]
    IdOutOfRange(u8),
    #[error("duplicate slave id {0}")]
    DuplicateId(u8),
    #[error("register count must be positive")]
    NoRegisters,
    #[error("register count {0} exceeds 125")]
    TooManyRegisters(u16),
    #[error("register count {count} is not a multiple of register size {size}")]
    Misaligned { count: u16, size: usize },
    #[error("{device} needs {needed} values, slave provides {provided}")]
    TooFewValues {
        device: DeviceType,
        needed: usize,
        provided: usize,
    },
    #[error("energy values span at least two registers")]
    NarrowEnergyRegisters,
    #[error("{field} must be a positive number, got {value}")]
    NonPositiveScale { field: &'static str, value: f32 },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of one reload
#[derive(Debug, Clone)]
pub struct ReloadReport {
    pub loaded: usize,
    /// `(entry index, reason)` for each skipped entry
    pub skipped: Vec<(usize, String)>,
    pub polling: PollingConfig,
}

#[derive(Debug, Default)]
pub struct SlaveRegistry {
    slaves: Rc<[Slave]>,
}

impl SlaveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the store. Storage failures leave the current list untouched;
    /// invalid entries are skipped and reported.
    pub fn reload(
        &mut self,
        store: &dyn ConfigStore,
        templates: &mut TemplateStore,
    ) -> Result<ReloadReport, RegistryError> {
        let mut polling = load_polling_config(store)?;
        if let Err(reason) = polling.validate() {
            warn!("Ignoring polling config ({}), using defaults", reason);
            polling = PollingConfig::default();
        }
        let document = load_slave_document(store)?.unwrap_or_default();

        let mut slaves = Vec::with_capacity(document.slaves.len());
        let mut seen = HashSet::new();
        let mut skipped = Vec::new();

        for (index, entry) in document.slaves.iter().enumerate() {
            let result = materialise(entry, store, templates).and_then(|slave| {
                if seen.insert(slave.id) {
                    Ok(slave)
                } else {
                    Err(SlaveRejected::DuplicateId(slave.id))
                }
            });
            match result {
                Ok(slave) => {
                    info!(
                        "Slave loaded: id={}, name={}, type={}, regs={}@{}",
                        slave.id,
                        slave.name,
                        slave.device_type(),
                        slave.register_count,
                        slave.start_register
                    );
                    slaves.push(slave);
                }
                Err(reason) => {
                    warn!("Skipping slave entry {}: {}", index, reason);
                    skipped.push((index, reason.to_string()));
                }
            }
        }

        self.slaves = slaves.into();
        info!(
            "Reloaded {} slaves ({} skipped), poll interval {}s, timeout {}s",
            self.slaves.len(),
            skipped.len(),
            polling.poll_interval,
            polling.timeout
        );
        Ok(ReloadReport {
            loaded: self.slaves.len(),
            skipped,
            polling,
        })
    }

    /// Snapshot of the current list, cheap to clone
    pub fn list(&self) -> Rc<[Slave]> {
        Rc::clone(&self.slaves)
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }
}

/// Build one slave from its persisted record, its template and its override
pub fn materialise(
    entry: &Value,
    store: &dyn ConfigStore,
    templates: &mut TemplateStore,
) -> Result<Slave, SlaveRejected> {
    let record: SlaveRecord = serde_json::from_value(entry.clone())
        .map_err(|e| SlaveRejected::Malformed(e.to_string()))?;
    let device_type = DeviceType::from_type_name(&record.device_type)
        .ok_or_else(|| SlaveRejected::UnknownDeviceType(record.device_type.clone()))?;
    let register_size =
        RegisterSize::try_from(record.register_size).map_err(SlaveRejected::Malformed)?;

    let template = templates.load_template(store, &record.device_type)?;
    let merged = match &record.overrides {
        Some(overrides) => merge(overrides, &template)?,
        None => template,
    };

    let slave = Slave {
        id: record.id,
        start_register: record.start_reg,
        register_count: record.num_reg,
        name: record.name,
        mqtt_topic: record.mqtt_topic,
        register_size,
        ct: record.ct,
        pt: record.pt,
        scales: scales_from(device_type, &merged)?,
    };
    validate(&slave)?;
    Ok(slave)
}

/// Read the device-class section of a materialised tree into its typed record
pub fn scales_from(device_type: DeviceType, merged: &Document) -> Result<DeviceScales, SlaveRejected> {
    let section = merged
        .get(device_type.section())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let malformed = |e: serde_json::Error| SlaveRejected::Malformed(e.to_string());
    Ok(match device_type {
        DeviceType::Sensor => DeviceScales::Sensor(serde_json::from_value(section).map_err(malformed)?),
        DeviceType::PowerMeter => {
            DeviceScales::PowerMeter(serde_json::from_value(section).map_err(malformed)?)
        }
        DeviceType::VoltageMeter => {
            DeviceScales::VoltageMeter(serde_json::from_value(section).map_err(malformed)?)
        }
        DeviceType::EnergyMeter => {
            DeviceScales::EnergyMeter(serde_json::from_value(section).map_err(malformed)?)
        }
    })
}

fn positive(field: &'static str, value: f32) -> Result<(), SlaveRejected> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SlaveRejected::NonPositiveScale { field, value })
    }
}

/// Per-slave invariants checked at reload
pub fn validate(slave: &Slave) -> Result<(), SlaveRejected> {
    if slave.id == 0 || slave.id > MAX_SLAVE_ID {
        return Err(SlaveRejected::IdOutOfRange(slave.id));
    }
    if slave.register_count == 0 {
        return Err(SlaveRejected::NoRegisters);
    }
    if slave.register_count > MAX_READ_COUNT {
        return Err(SlaveRejected::TooManyRegisters(slave.register_count));
    }
    let size = slave.register_size.words();
    if slave.register_count as usize % size != 0 {
        return Err(SlaveRejected::Misaligned {
            count: slave.register_count,
            size,
        });
    }
    let device = slave.device_type();
    if slave.value_count() < device.required_values() {
        return Err(SlaveRejected::TooFewValues {
            device,
            needed: device.required_values(),
            provided: slave.value_count(),
        });
    }
    if device == DeviceType::EnergyMeter && slave.register_size == RegisterSize::W16 {
        return Err(SlaveRejected::NarrowEnergyRegisters);
    }
    positive("ct", slave.ct)?;
    positive("pt", slave.pt)?;
    for (field, divider) in slave.scales.dividers() {
        positive(field, divider)?;
    }
    Ok(())
}
