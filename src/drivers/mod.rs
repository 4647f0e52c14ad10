// Communication drivers
//
// Field bus, uplink and network supervision. Each submodule exposes a trait seam
// used by the scheduler plus the production implementation behind it.

/// Cloud connectivity driver
/// MQTT publisher for slave reports
pub mod cloud;

/// Network link supervision and the IP info view
pub mod link;

/// Modbus RTU master over an RS-485 serial line
pub mod modbus;
