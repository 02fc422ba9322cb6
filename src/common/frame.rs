use crate::common::{crc16, format_bytes};
use crate::constants::{mbap, rtu};
use crate::decode::FrameDecodeLevel;
use crate::error::CrcMismatch;

/// Accumulates a Modbus/TCP byte stream and yields complete PDUs.
///
/// A frame is complete once the buffer holds the 6-byte MBAP header plus the
/// number of bytes its length field announces. Exactly that many bytes are
/// drained per extracted frame. The framer performs no I/O and holds no
/// locks; it is a synchronous transformer over (buffer, chunk).
pub(crate) struct MbapFramer {
    buffer: Vec<u8>,
    decode: FrameDecodeLevel,
}

impl MbapFramer {
    pub(crate) fn new(decode: FrameDecodeLevel) -> Self {
        Self {
            buffer: Vec::new(),
            decode,
        }
    }

    /// Append a received chunk and extract every complete PDU, in wire order
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut pdus = Vec::new();
        while self.buffer.len() >= mbap::HEADER_LENGTH {
            let length = u16::from_be_bytes([self.buffer[4], self.buffer[5]]) as usize;
            if self.buffer.len() < mbap::HEADER_LENGTH + length {
                break;
            }

            let pdu: Vec<u8> = self
                .buffer
                .drain(..mbap::HEADER_LENGTH + length)
                .skip(mbap::HEADER_LENGTH)
                .collect();

            if self.decode.enabled() {
                tracing::info!("MBAP RX - {}", FrameDisplay::new(self.decode, &pdu));
            }

            pdus.push(pdu);
        }

        pdus
    }
}

/// Accumulates a Modbus/RTU byte stream and yields complete PDUs.
///
/// RTU frames carry no length prefix, so the expected frame length is
/// derived from the function byte. Bytes are only consumed once a CRC-valid
/// frame starts at the head of the buffer; any byte that cannot begin a
/// valid frame (unknown function, failed CRC) is discarded one at a time,
/// which makes the framer resistant to line noise between frames.
pub(crate) struct RtuFramer {
    buffer: Vec<u8>,
    decode: FrameDecodeLevel,
}

impl RtuFramer {
    pub(crate) fn new(decode: FrameDecodeLevel) -> Self {
        Self {
            buffer: Vec::new(),
            decode,
        }
    }

    /// Append a received chunk and extract every CRC-valid PDU, in wire order
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut pdus = Vec::new();
        let mut offset = 0;

        while self.buffer.len() >= offset + rtu::MIN_FRAME_LENGTH {
            let function = self.buffer[offset + 1];

            let frame_length = match expected_frame_length(function) {
                Some(FrameLength::Fixed(length)) => length,
                Some(FrameLength::ByteCountAt(index)) => {
                    let byte_count = self.buffer[offset + index] as usize;
                    index + 1 + byte_count + rtu::CRC_LENGTH
                }
                None => {
                    // cannot start a frame here, resync by one byte
                    offset += 1;
                    continue;
                }
            };

            if self.buffer.len() < offset + frame_length {
                break;
            }

            let frame = &self.buffer[offset..offset + frame_length];
            let received = u16::from(frame[frame_length - 1]) << 8 | u16::from(frame[frame_length - 2]);
            let computed = crc16(&frame[..frame_length - rtu::CRC_LENGTH]);

            if received != computed {
                tracing::warn!("RTU resync - {}", CrcMismatch { received, computed });
                offset += 1;
                continue;
            }

            let pdu = frame[..frame_length - rtu::CRC_LENGTH].to_vec();
            if self.decode.enabled() {
                tracing::info!("RTU RX - {}", FrameDisplay::new(self.decode, &pdu));
            }
            pdus.push(pdu);
            offset += frame_length;
        }

        if offset > 0 {
            self.buffer.drain(..offset);
        }

        pdus
    }
}

enum FrameLength {
    /// The frame length is fully determined by the function code
    Fixed(usize),
    /// The byte at this frame-relative index holds the remaining data length
    ByteCountAt(usize),
}

fn expected_frame_length(function: u8) -> Option<FrameLength> {
    // exception replies are always address + function + code + CRC
    if function & 0x80 != 0 {
        return Some(FrameLength::Fixed(rtu::MIN_FRAME_LENGTH));
    }

    match function {
        0x03 | 0x04 => Some(FrameLength::ByteCountAt(2)),
        0x06 | 0x10 => Some(FrameLength::Fixed(rtu::WRITE_ECHO_FRAME_LENGTH)),
        _ => None,
    }
}

struct FrameDisplay<'a> {
    level: FrameDecodeLevel,
    pdu: &'a [u8],
}

impl<'a> FrameDisplay<'a> {
    fn new(level: FrameDecodeLevel, pdu: &'a [u8]) -> Self {
        Self { level, pdu }
    }
}

impl std::fmt::Display for FrameDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let unit = self.pdu.first().copied().unwrap_or(0);
        write!(f, "unit: {:#04X} len: {}", unit, self.pdu.len())?;
        if self.level.payload_enabled() {
            format_bytes(f, self.pdu)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ_RESPONSE_TCP: &[u8] = &[
        0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B,
    ];
    const READ_RESPONSE_PDU: &[u8] = &[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B];

    fn rtu_frame(pdu: &[u8]) -> Vec<u8> {
        let mut frame = pdu.to_vec();
        let crc = crc16(pdu);
        frame.push((crc & 0x00FF) as u8);
        frame.push((crc >> 8) as u8);
        frame
    }

    #[test]
    fn tcp_emits_single_pdu_from_whole_frame() {
        let mut framer = MbapFramer::new(FrameDecodeLevel::Nothing);
        assert_eq!(framer.push(READ_RESPONSE_TCP), vec![READ_RESPONSE_PDU.to_vec()]);
    }

    #[test]
    fn tcp_waits_for_split_chunks() {
        let mut framer = MbapFramer::new(FrameDecodeLevel::Nothing);
        assert!(framer.push(&[0x00, 0x01, 0x00]).is_empty());
        assert!(framer.push(&[0x00, 0x00, 0x07, 0x01, 0x03]).is_empty());
        let pdus = framer.push(&[0x04, 0x00, 0x0A, 0x00, 0x0B]);
        assert_eq!(pdus, vec![READ_RESPONSE_PDU.to_vec()]);
    }

    #[test]
    fn tcp_emits_multiple_pdus_from_one_chunk() {
        let mut stream = READ_RESPONSE_TCP.to_vec();
        stream.extend_from_slice(READ_RESPONSE_TCP);
        let mut framer = MbapFramer::new(FrameDecodeLevel::Nothing);
        let pdus = framer.push(&stream);
        assert_eq!(pdus.len(), 2);
        assert!(pdus.iter().all(|pdu| pdu == READ_RESPONSE_PDU));
    }

    #[test]
    fn tcp_chunking_is_invariant() {
        let mut stream = READ_RESPONSE_TCP.to_vec();
        stream.extend_from_slice(READ_RESPONSE_TCP);

        let expected = MbapFramer::new(FrameDecodeLevel::Nothing).push(&stream);

        for split in 1..stream.len() {
            let mut framer = MbapFramer::new(FrameDecodeLevel::Nothing);
            let mut pdus = framer.push(&stream[..split]);
            pdus.extend(framer.push(&stream[split..]));
            assert_eq!(pdus, expected, "split at {split}");
        }
    }

    #[test]
    fn rtu_emits_read_response() {
        let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
        let pdus = framer.push(&rtu_frame(READ_RESPONSE_PDU));
        assert_eq!(pdus, vec![READ_RESPONSE_PDU.to_vec()]);
    }

    #[test]
    fn rtu_emits_exception_and_write_echo_frames() {
        let exception = rtu_frame(&[0x01, 0x83, 0x02]);
        let write_echo = rtu_frame(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]);

        let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
        let mut stream = exception.clone();
        stream.extend_from_slice(&write_echo);

        let pdus = framer.push(&stream);
        assert_eq!(pdus.len(), 2);
        assert_eq!(pdus[0], [0x01, 0x83, 0x02]);
        assert_eq!(pdus[1], [0x01, 0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn rtu_waits_for_incomplete_frame() {
        let frame = rtu_frame(READ_RESPONSE_PDU);
        let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
        assert!(framer.push(&frame[..4]).is_empty());
        assert_eq!(framer.push(&frame[4..]), vec![READ_RESPONSE_PDU.to_vec()]);
    }

    #[test]
    fn rtu_resyncs_over_garbage_between_frames() {
        let frame = rtu_frame(READ_RESPONSE_PDU);
        let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF];
        stream.extend_from_slice(&frame);
        stream.extend_from_slice(&[0x55, 0x55]);
        stream.extend_from_slice(&frame);

        let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
        let pdus = framer.push(&stream);
        assert_eq!(pdus.len(), 2);
        assert!(pdus.iter().all(|pdu| pdu == READ_RESPONSE_PDU));
    }

    #[test]
    fn rtu_discards_one_byte_on_crc_mismatch() {
        let mut corrupted = rtu_frame(READ_RESPONSE_PDU);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
        assert!(framer.push(&corrupted).is_empty());

        // a subsequent valid frame still comes out
        let pdus = framer.push(&rtu_frame(READ_RESPONSE_PDU));
        assert_eq!(pdus, vec![READ_RESPONSE_PDU.to_vec()]);
    }

    #[test]
    fn rtu_chunking_is_invariant() {
        let mut stream = vec![0x99]; // leading noise
        stream.extend_from_slice(&rtu_frame(READ_RESPONSE_PDU));
        stream.extend_from_slice(&rtu_frame(&[0x02, 0x84, 0x03]));

        let expected = RtuFramer::new(FrameDecodeLevel::Nothing).push(&stream);
        assert_eq!(expected.len(), 2);

        for split in 1..stream.len() {
            let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
            let mut pdus = framer.push(&stream[..split]);
            pdus.extend(framer.push(&stream[split..]));
            assert_eq!(pdus, expected, "split at {split}");
        }
    }

    #[test]
    fn rtu_emitted_frames_carry_valid_crc_over_consumed_region() {
        let frame = rtu_frame(READ_RESPONSE_PDU);
        let mut framer = RtuFramer::new(FrameDecodeLevel::Nothing);
        for pdu in framer.push(&frame) {
            let crc = crc16(&pdu);
            assert_eq!(
                [frame[frame.len() - 2], frame[frame.len() - 1]],
                [(crc & 0x00FF) as u8, (crc >> 8) as u8]
            );
        }
    }
}
