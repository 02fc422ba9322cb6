/// limits defined by the Modbus specification
pub mod limits {
    /// Maximum count allowed in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 0x007D;
    /// Maximum count allowed in a write multiple registers request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 0x007B;
}

/// raw values of the exception codes defined by the Modbus specification
pub mod exceptions {
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub const SERVER_DEVICE_FAILURE: u8 = 0x04;
    pub const ACKNOWLEDGE: u8 = 0x05;
    pub const SERVER_DEVICE_BUSY: u8 = 0x06;
    pub const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;
}

pub(crate) mod mbap {
    /// MBAP header: transaction id (2) + protocol id (2) + length (2)
    pub(crate) const HEADER_LENGTH: usize = 6;
    /// Fixed transaction id used by the master. Only one request is ever
    /// outstanding per session, so the id carries no information.
    pub(crate) const TX_ID: u16 = 0x0001;
}

pub(crate) mod rtu {
    /// Smallest complete RTU frame: address + exception function + code + CRC
    pub(crate) const MIN_FRAME_LENGTH: usize = 5;
    pub(crate) const CRC_LENGTH: usize = 2;
    /// Write echo frames have a fixed layout: address + function + start + quantity/value + CRC
    pub(crate) const WRITE_ECHO_FRAME_LENGTH: usize = 8;
}

pub(crate) mod frame {
    /// Largest frame either transport can produce (MBAP header + maximum PDU)
    pub(crate) const MAX_FRAME_LENGTH: usize = 260;
}
