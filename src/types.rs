use crate::common::function::FunctionCode;
use crate::constants::limits;
use crate::error::InvalidRequest;
use crate::exception::ExceptionCode;

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

/// The two wire dialects a session can speak
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    /// Modbus/TCP: MBAP-prefixed frames
    Tcp,
    /// Modbus/RTU: CRC-trailed frames
    Rtu,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConnectionType::Tcp => f.write_str("tcp"),
            ConnectionType::Rtu => f.write_str("rtu"),
        }
    }
}

/// A fully described register operation, ready to be framed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Addressed slave device
    pub unit_id: UnitId,
    /// Register function to perform
    pub function: FunctionCode,
    /// Starting register address
    pub address: u16,
    /// Number of registers (reads) or number of values (write multiple)
    pub count: u16,
    /// Values to write; empty for reads, one element for write single
    pub values: Vec<u16>,
}

impl Request {
    /// Build a validated read request. `input` selects input registers
    /// (`0x04`) over holding registers (`0x03`).
    pub fn read(
        unit_id: UnitId,
        address: u16,
        count: u16,
        input: bool,
    ) -> Result<Self, InvalidRequest> {
        if count == 0 {
            return Err(InvalidRequest::CountOfZero);
        }
        if count > limits::MAX_READ_REGISTERS_COUNT {
            return Err(InvalidRequest::CountTooBigForType(
                count,
                limits::MAX_READ_REGISTERS_COUNT,
            ));
        }
        if address.checked_add(count - 1).is_none() {
            return Err(InvalidRequest::AddressOverflow(address, count));
        }

        let function = if input {
            FunctionCode::ReadInputRegisters
        } else {
            FunctionCode::ReadHoldingRegisters
        };

        Ok(Self {
            unit_id,
            function,
            address,
            count,
            values: Vec::new(),
        })
    }

    /// Build a write-single-register request
    pub fn write_single(unit_id: UnitId, address: u16, value: u16) -> Self {
        Self {
            unit_id,
            function: FunctionCode::WriteSingleRegister,
            address,
            count: 1,
            values: vec![value],
        }
    }

    /// Build a validated write-multiple-registers request
    pub fn write_multiple(
        unit_id: UnitId,
        address: u16,
        values: Vec<u16>,
    ) -> Result<Self, InvalidRequest> {
        if values.is_empty() {
            return Err(InvalidRequest::EmptyValues);
        }
        if values.len() > limits::MAX_WRITE_REGISTERS_COUNT as usize {
            return Err(InvalidRequest::CountTooBigForType(
                values.len() as u16,
                limits::MAX_WRITE_REGISTERS_COUNT,
            ));
        }

        Ok(Self {
            unit_id,
            function: FunctionCode::WriteMultipleRegisters,
            address,
            count: values.len() as u16,
            values,
        })
    }
}

/// A response PDU decoded from the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Unit id echoed by the slave
    pub unit_id: UnitId,
    /// Raw function byte as received, exception bit included
    pub function: u8,
    /// Extracted register words; empty for write confirmations
    pub values: Vec<u16>,
    /// Present when the response is an exception PDU
    pub exception: Option<ExceptionCode>,
}

impl Response {
    /// The function code with the exception bit stripped, when recognized
    pub fn function_code(&self) -> Option<FunctionCode> {
        FunctionCode::get(self.function & 0x7F)
    }

    /// True for a successful reply to a register read
    pub fn is_read_reply(&self) -> bool {
        self.exception.is_none()
            && matches!(
                self.function_code(),
                Some(FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters)
            )
    }
}

/// The completed outcome of a read, correlated against its request context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadResult {
    /// Slave the request was addressed to
    pub unit_id: UnitId,
    /// Starting register address of the request
    pub address: u16,
    /// Number of registers requested
    pub count: u16,
    /// Read function that produced the values
    pub function: FunctionCode,
    /// Register words carried by the response
    pub values: Vec<u16>,
}

/// One read of a `read_group` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    /// Addressed slave device
    pub unit_id: u8,
    /// Starting register address
    pub address: u16,
    /// Number of registers to read
    pub count: u16,
    /// Read input registers instead of holding registers
    pub input: bool,
}

/// One write of a `write_group` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteRequest {
    /// Write a single holding register
    Single {
        /// Addressed slave device
        unit_id: u8,
        /// Register address
        address: u16,
        /// Value to write
        value: u16,
    },
    /// Write a contiguous block of holding registers
    Multiple {
        /// Addressed slave device
        unit_id: u8,
        /// Starting register address
        address: u16,
        /// Values to write, one register each
        values: Vec<u16>,
    },
}

/// Serial stop bit selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

impl StopBits {
    /// Parse from the numeric form used by configuration surfaces
    pub fn from_u8(value: u8) -> Result<Self, InvalidRequest> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(InvalidRequest::BadStopBits(other)),
        }
    }
}

/// Describes an open (or previously open) transport endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportConfig {
    /// Modbus/TCP endpoint
    Tcp {
        /// Remote host name or address
        host: String,
        /// Remote TCP port
        port: u16,
    },
    /// Modbus/RTU endpoint
    Rtu {
        /// Serial device path
        path: String,
        /// Baud rate
        baud_rate: u32,
        /// Stop bits (data bits and parity are fixed at 8/none)
        stop_bits: StopBits,
    },
}

impl TransportConfig {
    /// The wire dialect this endpoint speaks
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            TransportConfig::Tcp { .. } => ConnectionType::Tcp,
            TransportConfig::Rtu { .. } => ConnectionType::Rtu,
        }
    }
}

/// Snapshot of the active transport configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportStatus {
    /// True while a transport is open
    pub active: bool,
    /// The most recently opened endpoint, retained after close
    pub config: Option<TransportConfig>,
}
