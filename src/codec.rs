// 寄存器编解码
// Pure register arithmetic: word combination, sign extension, engineering-unit formulas, CRC-16/Modbus

use crate::types::RegisterSize;

/// Concatenate `size` consecutive words starting at `index`, high word first.
///
/// Caller guarantees `index + size.words() <= words.len()`.
pub fn combine(words: &[u16], size: RegisterSize, index: usize) -> u64 {
    words[index..index + size.words()]
        .iter()
        .fold(0u64, |acc, &w| (acc << 16) | w as u64)
}

/// Two's-complement interpretation of the low `16 * size` bits of `value`
pub fn to_signed(value: u64, size: RegisterSize) -> i64 {
    let bits = size.bits();
    if bits == 64 {
        return value as i64;
    }
    let mask = (1u64 << bits) - 1;
    let value = value & mask;
    if value & (1u64 << (bits - 1)) != 0 {
        (value | !mask) as i64
    } else {
        value as i64
    }
}

/// Split a register block into `len / size` logical values
pub fn combine_all(words: &[u16], size: RegisterSize) -> Vec<u64> {
    (0..words.len() / size.words())
        .map(|i| combine(words, size, i * size.words()))
        .collect()
}

// Fixed formula constants
const TENTH: f64 = 0.1;
const CURRENT_SCALE: f64 = 10000.0;
const SINGLE_PHASE_SCALE: f64 = 100.0;
const THREE_PHASE_SCALE: f64 = 10.0;
const POWER_FACTOR_SCALE: f64 = 10000.0;
const VOLTAGE_SCALE: f64 = 100.0;
const ENERGY_SCALE: f64 = 100.0;

/// °C from a signed register: `(signed · 0.1) / divider`
pub fn temperature(raw: i64, divider: f32) -> f32 {
    (raw as f64 * TENTH / divider as f64) as f32
}

pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    (celsius as f64 * 9.0 / 5.0 + 32.0) as f32
}

/// Relative humidity: `(unsigned · 0.1) / divider`
pub fn humidity(raw: u64, divider: f32) -> f32 {
    (raw as f64 * TENTH / divider as f64) as f32
}

/// `(unsigned · ct) / 10000 / divider`
pub fn current(raw: u64, ct: f32, divider: f32) -> f32 {
    (raw as f64 * ct as f64 / CURRENT_SCALE / divider as f64) as f32
}

/// `(signed · pt · ct) / 100 / divider`
pub fn single_phase_power(raw: i64, pt: f32, ct: f32, divider: f32) -> f32 {
    (raw as f64 * pt as f64 * ct as f64 / SINGLE_PHASE_SCALE / divider as f64) as f32
}

/// `(signed · pt · ct) / 10 / divider`
pub fn three_phase_power(raw: i64, pt: f32, ct: f32, divider: f32) -> f32 {
    (raw as f64 * pt as f64 * ct as f64 / THREE_PHASE_SCALE / divider as f64) as f32
}

/// `signed / 10000 / divider`
pub fn power_factor(raw: i64, divider: f32) -> f32 {
    (raw as f64 / POWER_FACTOR_SCALE / divider as f64) as f32
}

/// `(unsigned · pt) / 100 / divider`
pub fn voltage(raw: u64, pt: f32, divider: f32) -> f32 {
    (raw as f64 * pt as f64 / VOLTAGE_SCALE / divider as f64) as f32
}

/// Cumulative energy: `unsigned / 100 / divider`
pub fn energy(raw: u64, divider: f32) -> f32 {
    (raw as f64 / ENERGY_SCALE / divider as f64) as f32
}

/// CRC-16/Modbus (reflected polynomial 0xA001, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
