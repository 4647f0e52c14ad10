// Modbus RTU 主站驱动
// 通过半双工 RS-485 线路发送 ReadHoldingRegisters 请求，非阻塞地接收并校验响应帧

use crate::codec::crc16;
use log::{debug, warn};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;

/// ReadHoldingRegisters 功能码
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// 异常响应时功能码最高位置 1
pub const EXCEPTION_FLAG: u8 = 0x80;
/// 单次请求允许的最大寄存器数量
pub const MAX_READ_COUNT: u16 = 125;

/// 驱动错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("A transaction is already in flight")]
    BusBusy,
    #[error("Requested {0} registers, at most 125 fit in one frame")]
    FrameTooLarge(u16),
    #[error("Serial I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// 响应帧错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("Modbus exception 0x{0:02X}")]
    Exception(u8),
    #[error("CRC mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    Crc { expected: u16, received: u16 },
    #[error("Framing error: {0}")]
    Framing(String),
}

/// `poll()` 的结果。超时由调用方判定，驱动不返回超时。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Complete(Vec<u16>),
    ProtocolError(ProtocolErrorKind),
}

/// 半双工串口线路抽象，读操作必须非阻塞
pub trait SerialLine {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DriverError>;
    /// 追加当前已到达的字节到 `buf`，返回追加的字节数
    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize, DriverError>;
    fn discard_input(&mut self) -> Result<(), DriverError>;
    /// 驱动 DE/RE 方向控制
    fn set_transmit(&mut self, enabled: bool) -> Result<(), DriverError>;
}

/// 轮询引擎看到的总线事务接口
pub trait ModbusTransport {
    fn begin_transaction(&mut self, slave_id: u8, start_register: u16, count: u16) -> Result<(), DriverError>;
    fn poll(&mut self) -> PollStatus;
    fn abort(&mut self);
    fn in_flight(&self) -> bool;
}

/// 构造 ReadHoldingRegisters 请求帧 (CRC 低字节在前)
pub fn read_holding_request(slave_id: u8, start_register: u16, count: u16) -> [u8; 8] {
    let [start_hi, start_lo] = start_register.to_be_bytes();
    let [count_hi, count_lo] = count.to_be_bytes();
    let body = [slave_id, READ_HOLDING_REGISTERS, start_hi, start_lo, count_hi, count_lo];
    let [crc_lo, crc_hi] = crc16(&body).to_le_bytes();
    [body[0], body[1], body[2], body[3], body[4], body[5], crc_lo, crc_hi]
}

fn check_crc(frame: &[u8]) -> Result<(), ProtocolErrorKind> {
    let split = frame.len() - 2;
    let expected = crc16(&frame[..split]);
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if expected == received {
        Ok(())
    } else {
        Err(ProtocolErrorKind::Crc { expected, received })
    }
}

/// 增量解析响应帧。字节不足时返回 `None`。
///
/// # 参数
/// * `rx` - 已接收的字节
/// * `slave_id` - 期望回显的从站地址
/// * `count` - 请求的寄存器数量
pub fn parse_response(rx: &[u8], slave_id: u8, count: u16) -> Option<Result<Vec<u16>, ProtocolErrorKind>> {
    if rx.is_empty() {
        return None;
    }
    if rx[0] != slave_id {
        return Some(Err(ProtocolErrorKind::Framing(format!(
            "address 0x{:02X} does not match slave 0x{:02X}",
            rx[0], slave_id
        ))));
    }
    let function = *rx.get(1)?;
    if function == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        if rx.len() < 5 {
            return None;
        }
        return Some(check_crc(&rx[..5]).and(Err(ProtocolErrorKind::Exception(rx[2]))));
    }
    if function != READ_HOLDING_REGISTERS {
        return Some(Err(ProtocolErrorKind::Framing(format!(
            "unexpected function code 0x{:02X}",
            function
        ))));
    }
    let byte_count = *rx.get(2)? as usize;
    if byte_count != count as usize * 2 {
        return Some(Err(ProtocolErrorKind::Framing(format!(
            "byte count {} for {} registers",
            byte_count, count
        ))));
    }
    let frame_len = 3 + byte_count + 2;
    if rx.len() < frame_len {
        return None;
    }
    let frame = &rx[..frame_len];
    if let Err(e) = check_crc(frame) {
        return Some(Err(e));
    }
    let words = frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Some(Ok(words))
}

#[derive(Debug)]
struct InFlight {
    slave_id: u8,
    count: u16,
    rx: Vec<u8>,
}

/// Modbus RTU 主站，独占一条半双工线路
pub struct ModbusDriver<L: SerialLine> {
    /// 底层串口线路
    line: L,
    /// 当前事务，同一时刻最多一个
    in_flight: Option<InFlight>,
}

impl<L: SerialLine> ModbusDriver<L> {
    pub fn new(line: L) -> Self {
        Self { line, in_flight: None }
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    pub fn line_mut(&mut self) -> &mut L {
        &mut self.line
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), DriverError> {
        self.line.discard_input()?;
        self.line.set_transmit(true)?;
        let written = self.line.write_all(frame);
        // 无论发送成功与否都要释放总线
        let released = self.line.set_transmit(false);
        written.and(released)
    }
}

impl<L: SerialLine> ModbusTransport for ModbusDriver<L> {
    /// 发送请求并进入接收状态
    ///
    /// # 参数
    /// * `slave_id` - 从站地址
    /// * `start_register` - 起始寄存器地址
    /// * `count` - 寄存器数量
    fn begin_transaction(&mut self, slave_id: u8, start_register: u16, count: u16) -> Result<(), DriverError> {
        if self.in_flight.is_some() {
            return Err(DriverError::BusBusy);
        }
        if count == 0 || count > MAX_READ_COUNT {
            return Err(DriverError::FrameTooLarge(count));
        }
        let request = read_holding_request(slave_id, start_register, count);
        debug!("TX slave {}: {:02X?}", slave_id, request);
        self.transmit(&request)?;
        self.in_flight = Some(InFlight {
            slave_id,
            count,
            rx: Vec::with_capacity(5 + count as usize * 2),
        });
        Ok(())
    }

    fn poll(&mut self) -> PollStatus {
        let Some(transaction) = self.in_flight.as_mut() else {
            return PollStatus::Pending;
        };
        if let Err(e) = self.line.read_available(&mut transaction.rx) {
            warn!("Serial read failed: {}", e);
            self.in_flight = None;
            return PollStatus::ProtocolError(ProtocolErrorKind::Framing(format!("read failed: {}", e)));
        }
        match parse_response(&transaction.rx, transaction.slave_id, transaction.count) {
            None => PollStatus::Pending,
            Some(result) => {
                debug!("RX slave {}: {:02X?}", transaction.slave_id, transaction.rx);
                self.in_flight = None;
                match result {
                    Ok(words) => PollStatus::Complete(words),
                    Err(kind) => PollStatus::ProtocolError(kind),
                }
            }
        }
    }

    fn abort(&mut self) {
        if let Some(transaction) = self.in_flight.take() {
            debug!(
                "Aborted transaction to slave {} after {} bytes",
                transaction.slave_id,
                transaction.rx.len()
            );
        }
        if let Err(e) = self.line.discard_input() {
            warn!("Failed to flush serial input: {}", e);
        }
    }

    fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }
}

/// 基于 `serialport` 的 RS-485 线路，可选用 RTS 控制 DE/RE
pub struct SerialPortLine {
    port: Box<dyn SerialPort>,
    de_via_rts: bool,
}

impl SerialPortLine {
    /// 以 8N1 打开串口
    ///
    /// # 参数
    /// * `path` - 串口设备路径
    /// * `baud_rate` - 波特率
    /// * `de_via_rts` - 是否由 RTS 驱动收发方向
    pub fn open(path: &str, baud_rate: u32, de_via_rts: bool) -> Result<Self, DriverError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(10))
            .open()?;
        let mut line = Self { port, de_via_rts };
        line.set_transmit(false)?;
        Ok(line)
    }
}

impl SerialLine for SerialPortLine {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize, DriverError> {
        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(0);
        }
        let mut chunk = vec![0u8; available];
        match self.port.read(&mut chunk) {
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn discard_input(&mut self) -> Result<(), DriverError> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_transmit(&mut self, enabled: bool) -> Result<(), DriverError> {
        if self.de_via_rts {
            self.port.write_request_to_send(enabled)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 脚本化线路：记录发送内容，按块吐出预置的接收字节
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedLine {
        pub written: Vec<Vec<u8>>,
        pub incoming: VecDeque<u8>,
        pub transmit_log: Vec<bool>,
        pub discards: usize,
        pub chunk: usize,
    }

    impl ScriptedLine {
        pub(crate) fn feed(&mut self, bytes: &[u8]) {
            self.incoming.extend(bytes);
        }
    }

    impl SerialLine for ScriptedLine {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
            self.written.push(bytes.to_vec());
            Ok(())
        }

        fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize, DriverError> {
            let take = if self.chunk == 0 {
                self.incoming.len()
            } else {
                self.chunk.min(self.incoming.len())
            };
            buf.extend(self.incoming.drain(..take));
            Ok(take)
        }

        fn discard_input(&mut self) -> Result<(), DriverError> {
            self.discards += 1;
            self.incoming.clear();
            Ok(())
        }

        fn set_transmit(&mut self, enabled: bool) -> Result<(), DriverError> {
            self.transmit_log.push(enabled);
            Ok(())
        }
    }

    /// 构造带 CRC 的正常响应帧
    pub(crate) fn response_frame(slave_id: u8, words: &[u16]) -> Vec<u8> {
        let mut frame = vec![slave_id, READ_HOLDING_REGISTERS, (words.len() * 2) as u8];
        for w in words {
            frame.extend_from_slice(&w.to_be_bytes());
        }
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn request_frame_layout() {
        assert_eq!(
            read_holding_request(0x01, 0x0000, 0x000A),
            [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
    }

    #[test]
    fn begin_toggles_direction_and_rejects_second_transaction() {
        let mut driver = ModbusDriver::new(ScriptedLine::default());
        driver.begin_transaction(3, 0, 2).unwrap();
        assert_eq!(driver.line().transmit_log, vec![true, false]);
        assert_eq!(driver.line().written.len(), 1);
        assert_eq!(driver.line().discards, 1);
        assert!(matches!(driver.begin_transaction(4, 0, 2), Err(DriverError::BusBusy)));
        assert!(driver.in_flight());
    }

    #[test]
    fn response_assembled_across_polls() {
        let mut driver = ModbusDriver::new(ScriptedLine {
            chunk: 3,
            ..Default::default()
        });
        driver.begin_transaction(3, 0, 2).unwrap();
        assert_eq!(driver.poll(), PollStatus::Pending);

        let frame = response_frame(3, &[0x00FA, 0x01F4]);
        driver.line_mut().feed(&frame);
        assert_eq!(driver.poll(), PollStatus::Pending);
        assert_eq!(driver.poll(), PollStatus::Pending);
        assert_eq!(driver.poll(), PollStatus::Complete(vec![0x00FA, 0x01F4]));
        assert!(!driver.in_flight());
    }

    #[test]
    fn exception_response_is_reported() {
        let mut driver = ModbusDriver::new(ScriptedLine::default());
        driver.begin_transaction(3, 0, 2).unwrap();
        let mut frame = vec![3, 0x83, 0x02];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        driver.line_mut().feed(&frame);
        assert_eq!(
            driver.poll(),
            PollStatus::ProtocolError(ProtocolErrorKind::Exception(0x02))
        );
    }

    #[test]
    fn corrupted_crc_is_reported() {
        let mut driver = ModbusDriver::new(ScriptedLine::default());
        driver.begin_transaction(3, 0, 2).unwrap();
        let mut frame = response_frame(3, &[1, 2]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        driver.line_mut().feed(&frame);
        assert!(matches!(
            driver.poll(),
            PollStatus::ProtocolError(ProtocolErrorKind::Crc { .. })
        ));
    }

    #[test]
    fn wrong_address_and_byte_count_are_framing_errors() {
        assert!(matches!(
            parse_response(&[4, 3, 4], 3, 2),
            Some(Err(ProtocolErrorKind::Framing(_)))
        ));
        assert!(matches!(
            parse_response(&[3, 3, 6], 3, 2),
            Some(Err(ProtocolErrorKind::Framing(_)))
        ));
        assert!(matches!(
            parse_response(&[3, 0x04], 3, 2),
            Some(Err(ProtocolErrorKind::Framing(_)))
        ));
        assert_eq!(parse_response(&[3, 3], 3, 2), None);
    }

    #[test]
    fn abort_discards_partial_frame() {
        let mut driver = ModbusDriver::new(ScriptedLine::default());
        driver.begin_transaction(3, 0, 2).unwrap();
        driver.line_mut().feed(&[3, 3]);
        assert_eq!(driver.poll(), PollStatus::Pending);
        driver.abort();
        assert!(!driver.in_flight());
        assert_eq!(driver.poll(), PollStatus::Pending);
        driver.begin_transaction(4, 0, 2).unwrap();
    }

    #[test]
    fn oversized_request_is_refused() {
        let mut driver = ModbusDriver::new(ScriptedLine::default());
        assert!(matches!(
            driver.begin_transaction(3, 0, 126),
            Err(DriverError::FrameTooLarge(126))
        ));
        assert!(!driver.in_flight());
    }
}
