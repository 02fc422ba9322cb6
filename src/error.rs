use crate::exception::ExceptionCode;

/// Errors that can occur while making a request against the host facade
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An attempt to open a TCP or serial endpoint failed
    TransportOpenFailed(std::io::ErrorKind),
    /// An operation was invoked with no transport open
    NoActiveSession,
    /// An I/O error occurred on an open session
    Io(std::io::ErrorKind),
    /// The request itself was invalid
    BadRequest(InvalidRequest),
    /// A response PDU could not be interpreted
    BadResponse(AduParseError),
    /// A register sequence could not be decoded to or encoded from the
    /// selected logical data type
    BadValue(DataTypeError),
    /// The slave answered with an exception PDU
    Exception(ExceptionCode),
    /// No matching response arrived before the deadline
    ResponseTimeout,
    /// The background task processing I/O has been shut down
    Shutdown,
    /// A bug in the serialization logic of the library itself
    Internal(InternalError),
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::TransportOpenFailed(kind) => {
                write!(f, "failed to open transport: {kind}")
            }
            RequestError::NoActiveSession => f.write_str("no transport is open"),
            RequestError::Io(kind) => write!(f, "i/o error: {kind}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::BadResponse(err) => write!(f, "invalid response: {err}"),
            RequestError::BadValue(err) => write!(f, "data type error: {err}"),
            RequestError::Exception(code) => write!(f, "modbus exception: {code}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response")
            }
            RequestError::Shutdown => f.write_str("the i/o task has been shut down"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

/// Errors that result from a bad request parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// Read request with a count of zero
    CountOfZero,
    /// Read request with a count that exceeds what a single PDU can carry
    CountTooBigForType(u16, u16), // count / max
    /// start + count would overflow the u16 address space
    AddressOverflow(u16, u16), // start / count
    /// Write-multiple request with an empty value sequence
    EmptyValues,
    /// Serial stop bits other than 1 or 2
    BadStopBits(u8),
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "request count of {count} exceeds the maximum of {max} for this function"
            ),
            InvalidRequest::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the u16 address space"
            ),
            InvalidRequest::EmptyValues => f.write_str("write request contains no values"),
            InvalidRequest::BadStopBits(value) => {
                write!(f, "stop bits must be 1 or 2, got {value}")
            }
        }
    }
}

/// Errors that occur while interpreting a response PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// A PDU must carry at least a unit id and a function code
    PduTooShort(usize), // actual length
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::PduTooShort(length) => {
                write!(f, "PDU of {length} bytes is too short to be valid")
            }
        }
    }
}

/// Errors that occur while mapping register words to logical data types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataTypeError {
    /// The data type string does not match the canonical set, or the
    /// supplied payload does not fit the selected type
    UnsupportedType,
    /// An encode was requested with an empty payload
    NoDataToWrite,
    /// A decode requires more registers than the response carried
    InsufficientRegisters(usize, usize), // required / actual
    /// A value is outside the representable range of the selected type
    ValueOutOfRange(i64, i64, i64), // value / min / max
    /// A timestamp field is outside its permitted range
    FieldOutOfRange(&'static str),
}

impl std::error::Error for DataTypeError {}

impl std::fmt::Display for DataTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DataTypeError::UnsupportedType => f.write_str("unsupported data type"),
            DataTypeError::NoDataToWrite => f.write_str("no data to write"),
            DataTypeError::InsufficientRegisters(required, actual) => write!(
                f,
                "data type requires at least {required} registers, response carried {actual}"
            ),
            DataTypeError::ValueOutOfRange(value, min, max) => {
                write!(f, "value {value} is outside the range [{min}, {max}]")
            }
            DataTypeError::FieldOutOfRange(field) => {
                write!(f, "timestamp field '{field}' is out of range")
            }
        }
    }
}

/// Diagnostic reported when an RTU frame fails its CRC check. The framer
/// self-heals by resynchronizing; this never propagates to a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrcMismatch {
    /// CRC received on the wire
    pub received: u16,
    /// CRC computed over the candidate frame
    pub computed: u16,
}

impl std::fmt::Display for CrcMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "CRC mismatch: received {:#06X}, computed {:#06X}",
            self.received, self.computed
        )
    }
}

/// Possible bugs in the serialization logic of the library itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to write more bytes than the frame buffer can hold
    InsufficientWriteSpace,
    /// Attempted to read more bytes than present
    BadRead,
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace => {
                f.write_str("insufficient space for write operation")
            }
            InternalError::BadRead => f.write_str("attempted to read more bytes than present"),
        }
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<DataTypeError> for RequestError {
    fn from(err: DataTypeError) -> Self {
        RequestError::BadValue(err)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(code: ExceptionCode) -> Self {
        RequestError::Exception(code)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(_: scursor::WriteError) -> Self {
        RequestError::Internal(InternalError::InsufficientWriteSpace)
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(_: scursor::ReadError) -> Self {
        RequestError::Internal(InternalError::BadRead)
    }
}
