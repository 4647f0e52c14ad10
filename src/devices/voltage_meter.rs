// HeylaVoltage 电压表
// Line / phase voltage meter, five unsigned channels scaled by the slave PT

use crate::codec;
use crate::types::VoltageScales;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoltageReading {
    #[serde(rename = "A_Voltage_(V)")]
    pub a_voltage: f32,
    #[serde(rename = "B_Voltage_(V)")]
    pub b_voltage: f32,
    #[serde(rename = "C_Voltage_(V)")]
    pub c_voltage: f32,
    #[serde(rename = "Phase_Voltage_Mean_(V)")]
    pub phase_voltage_mean: f32,
    #[serde(rename = "Zero_Sequence_Voltage_(V)")]
    pub zero_sequence_voltage: f32,
}

pub fn decode(values: &[u64], pt: f32, scales: &VoltageScales) -> VoltageReading {
    let v = |index: usize, divider: f32| codec::voltage(values[index], pt, divider);
    VoltageReading {
        a_voltage: v(0, scales.a_voltage.divider),
        b_voltage: v(1, scales.b_voltage.divider),
        c_voltage: v(2, scales.c_voltage.divider),
        phase_voltage_mean: v(3, scales.phase_voltage_mean.divider),
        zero_sequence_voltage: v(4, scales.zero_sequence_voltage.divider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_ratio_scales_every_channel() {
        let values = [22_000, 22_100, 21_900, 22_000, 50];
        let reading = decode(&values, 2.0, &VoltageScales::default());
        assert!((reading.a_voltage - 440.0).abs() < 1e-3);
        assert!((reading.c_voltage - 438.0).abs() < 1e-3);
        assert!((reading.zero_sequence_voltage - 1.0).abs() < 1e-5);
    }
}
