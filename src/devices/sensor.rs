// G01S 温湿度传感器
// Temperature / humidity sensor: value 0 is signed temperature, value 1 is unsigned humidity

use crate::codec;
use crate::types::{RegisterSize, SensorScales};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(rename = "temperature_(C)")]
    pub temperature_c: f32,
    #[serde(rename = "temperature_(F)")]
    pub temperature_f: f32,
    pub humidity: f32,
}

pub fn decode(values: &[u64], size: RegisterSize, scales: &SensorScales) -> SensorReading {
    let temperature_c = codec::temperature(codec::to_signed(values[0], size), scales.temp_divider);
    SensorReading {
        temperature_c,
        temperature_f: codec::celsius_to_fahrenheit(temperature_c),
        humidity: codec::humidity(values[1], scales.humid_divider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_temperature_and_divider() {
        let scales = SensorScales {
            temp_divider: 2.0,
            humid_divider: 1.0,
        };
        // -10.0 °C raw, halved by the divider
        let reading = decode(&[0xFF9C, 455], RegisterSize::W16, &scales);
        assert!((reading.temperature_c + 5.0).abs() < 1e-5);
        assert!((reading.temperature_f - 23.0).abs() < 1e-4);
        assert!((reading.humidity - 45.5).abs() < 1e-4);
    }
}
