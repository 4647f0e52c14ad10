// HeylaParam 三相电力仪表
// Twenty-channel power meter: currents, active/reactive/apparent powers and power factors

use crate::codec;
use crate::types::{MeterScales, RegisterSize, ScaleParam};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeterReading {
    #[serde(rename = "A_Current_(A)")]
    pub a_current: f32,
    #[serde(rename = "B_Current_(A)")]
    pub b_current: f32,
    #[serde(rename = "C_Current_(A)")]
    pub c_current: f32,
    #[serde(rename = "Zero_Phase_Current_(A)")]
    pub zero_phase_current: f32,

    #[serde(rename = "A_Active_Power_(kW)")]
    pub a_active_power: f32,
    #[serde(rename = "B_Active_Power_(kW)")]
    pub b_active_power: f32,
    #[serde(rename = "C_Active_Power_(kW)")]
    pub c_active_power: f32,
    #[serde(rename = "Total_Active_Power_(kW)")]
    pub total_active_power: f32,

    #[serde(rename = "A_Reactive_Power_(kVar)")]
    pub a_reactive_power: f32,
    #[serde(rename = "B_Reactive_Power_(kVar)")]
    pub b_reactive_power: f32,
    #[serde(rename = "C_Reactive_Power_(kVar)")]
    pub c_reactive_power: f32,
    #[serde(rename = "Total_Reactive_Power_(kVar)")]
    pub total_reactive_power: f32,

    #[serde(rename = "A_Apparent_Power_(kVA)")]
    pub a_apparent_power: f32,
    #[serde(rename = "B_Apparent_Power_(kVA)")]
    pub b_apparent_power: f32,
    #[serde(rename = "C_Apparent_Power_(kVA)")]
    pub c_apparent_power: f32,
    #[serde(rename = "Total_Apparent_Power_(kVA)")]
    pub total_apparent_power: f32,

    #[serde(rename = "A_Power_Factor")]
    pub a_power_factor: f32,
    #[serde(rename = "B_Power_Factor")]
    pub b_power_factor: f32,
    #[serde(rename = "C_Power_Factor")]
    pub c_power_factor: f32,
    #[serde(rename = "Total_Power_Factor")]
    pub total_power_factor: f32,
}

/// Register layout: 0-3 currents, 4-7 active, 8-11 reactive, 12-15 apparent, 16-19 power factor.
/// Within each power group the fourth value is the three-phase total.
pub fn decode(values: &[u64], size: RegisterSize, ct: f32, pt: f32, scales: &MeterScales) -> MeterReading {
    let signed = |index: usize| codec::to_signed(values[index], size);
    let current = |index: usize, scale: ScaleParam| codec::current(values[index], ct, scale.divider);
    let phase = |index: usize, scale: ScaleParam| {
        codec::single_phase_power(signed(index), pt, ct, scale.divider)
    };
    let total = |index: usize, scale: ScaleParam| {
        codec::three_phase_power(signed(index), pt, ct, scale.divider)
    };
    let pf = |index: usize, scale: ScaleParam| codec::power_factor(signed(index), scale.divider);

    MeterReading {
        a_current: current(0, scales.a_current),
        b_current: current(1, scales.b_current),
        c_current: current(2, scales.c_current),
        zero_phase_current: current(3, scales.zero_phase_current),

        a_active_power: phase(4, scales.a_active_power),
        b_active_power: phase(5, scales.b_active_power),
        c_active_power: phase(6, scales.c_active_power),
        total_active_power: total(7, scales.total_active_power),

        a_reactive_power: phase(8, scales.a_reactive_power),
        b_reactive_power: phase(9, scales.b_reactive_power),
        c_reactive_power: phase(10, scales.c_reactive_power),
        total_reactive_power: total(11, scales.total_reactive_power),

        a_apparent_power: phase(12, scales.a_apparent_power),
        b_apparent_power: phase(13, scales.b_apparent_power),
        c_apparent_power: phase(14, scales.c_apparent_power),
        total_apparent_power: total(15, scales.total_apparent_power),

        a_power_factor: pf(16, scales.a_power_factor),
        b_power_factor: pf(17, scales.b_power_factor),
        c_power_factor: pf(18, scales.c_power_factor),
        total_power_factor: pf(19, scales.total_power_factor),
    }
}
