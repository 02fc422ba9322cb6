use scursor::{ReadCursor, WriteCursor};

use crate::common::crc16;
use crate::common::function::FunctionCode;
use crate::constants::{frame, mbap, rtu};
use crate::error::{AduParseError, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{ConnectionType, Request, Response, UnitId};

/// Encode a request descriptor into a complete wire frame for the given
/// connection type: MBAP-prefixed for TCP, CRC-trailed for RTU.
pub(crate) fn encode(request: &Request, connection: ConnectionType) -> Result<Vec<u8>, RequestError> {
    let mut buffer = [0u8; frame::MAX_FRAME_LENGTH];

    let length = match connection {
        ConnectionType::Tcp => {
            let mut cursor = WriteCursor::new(buffer.as_mut());
            cursor.write_u16_be(mbap::TX_ID)?;
            cursor.write_u16_be(0)?; // protocol id
            let len_pos = cursor.position();
            cursor.skip(2)?; // length is written once the PDU size is known
            let start_pdu = cursor.position();
            write_pdu(&mut cursor, request)?;
            let end_pdu = cursor.position();
            cursor.seek_to(len_pos)?;
            cursor.write_u16_be((end_pdu - start_pdu) as u16)?;
            end_pdu
        }
        ConnectionType::Rtu => {
            let end_pdu = {
                let mut cursor = WriteCursor::new(buffer.as_mut());
                write_pdu(&mut cursor, request)?;
                cursor.position()
            };
            let crc = crc16(&buffer[..end_pdu]);
            buffer[end_pdu] = (crc & 0x00FF) as u8;
            buffer[end_pdu + 1] = (crc >> 8) as u8;
            end_pdu + rtu::CRC_LENGTH
        }
    };

    Ok(buffer[..length].to_vec())
}

fn write_pdu(cursor: &mut WriteCursor, request: &Request) -> Result<(), RequestError> {
    cursor.write_u8(request.unit_id.value)?;
    cursor.write_u8(request.function.get_value())?;
    cursor.write_u16_be(request.address)?;

    match request.function {
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            cursor.write_u16_be(request.count)?;
        }
        FunctionCode::WriteSingleRegister => {
            cursor.write_u16_be(request.values.first().copied().unwrap_or(0))?;
        }
        FunctionCode::WriteMultipleRegisters => {
            cursor.write_u16_be(request.count)?;
            cursor.write_u8((request.values.len() * 2) as u8)?;
            for value in &request.values {
                cursor.write_u16_be(*value)?;
            }
        }
    }

    Ok(())
}

/// Decode a response PDU (no transport wrapper) into a [`Response`].
///
/// Only the two-byte minimum is enforced. A byte count that disagrees with
/// the actual payload produces a truncated value list rather than an error,
/// so correlation can still proceed.
pub(crate) fn parse_pdu(pdu: &[u8]) -> Result<Response, RequestError> {
    if pdu.len() < 2 {
        return Err(AduParseError::PduTooShort(pdu.len()).into());
    }

    let mut cursor = ReadCursor::new(pdu);
    let unit_id = UnitId::new(cursor.read_u8()?);
    let function = cursor.read_u8()?;

    if function & 0x80 != 0 {
        let code = cursor.read_u8().unwrap_or(0);
        return Ok(Response {
            unit_id,
            function,
            values: Vec::new(),
            exception: Some(ExceptionCode::from(code)),
        });
    }

    let mut values = Vec::new();
    if matches!(
        FunctionCode::get(function),
        Some(FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters)
    ) {
        if let Ok(byte_count) = cursor.read_u8() {
            for _ in 0..(byte_count / 2) {
                match cursor.read_u16_be() {
                    Ok(value) => values.push(value),
                    Err(_) => break,
                }
            }
        }
    }

    // write confirmations (0x06 / 0x10) only echo the request; nothing to extract

    Ok(Response {
        unit_id,
        function,
        values,
        exception: None,
    })
}
