// HeylaEnergy 电能表
// Cumulative energy counters, unsigned and at least 32 bits wide

use crate::codec;
use crate::types::EnergyScales;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyReading {
    #[serde(rename = "Total_Active_Energy_(kWh)")]
    pub total_active_energy: f32,
    #[serde(rename = "Import_Active_Energy_(kWh)")]
    pub import_active_energy: f32,
    #[serde(rename = "Export_Active_Energy_(kWh)")]
    pub export_active_energy: f32,
}

pub fn decode(values: &[u64], scales: &EnergyScales) -> EnergyReading {
    EnergyReading {
        total_active_energy: codec::energy(values[0], scales.total_active_energy.divider),
        import_active_energy: codec::energy(values[1], scales.import_active_energy.divider),
        export_active_energy: codec::energy(values[2], scales.export_active_energy.divider),
    }
}
