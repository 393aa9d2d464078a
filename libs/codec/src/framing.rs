//! Message framing and large-payload chunking.
//!
//! Encoded messages larger than the frame budget are split into numbered
//! frames and reassembled at the receiver before decoding. Chunking is
//! invisible above the transport: no partial message is ever observable.
//!
//! The frame budget is implementation-defined (`DEFAULT_MAX_FRAME_PAYLOAD`);
//! correctness for any payload size is covered by property tests below, not
//! by tuning.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use tracing::trace;

use crate::error::{CodecError, Result};

/// Frame magic, "SKNF".
pub const FRAME_MAGIC: u32 = 0x534B_4E46;

/// Default upper bound on one frame's payload: 256 KiB.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 256 * 1024;

/// Fixed-size header preceding every frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Identifies which logical message this frame belongs to. Unique per
    /// sender; receivers key reassembly on (sender, stream_id).
    pub stream_id: u64,
    /// Zero-based position of this frame within the message.
    pub index: u32,
    /// Total number of frames in the message.
    pub total: u32,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// CRC32 of the payload.
    pub checksum: u32,
}

impl FrameHeader {
    /// Encoded size: magic + stream_id + index + total + payload_len + checksum.
    pub const ENCODED_LEN: usize = 4 + 8 + 4 + 4 + 4 + 4;

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32(FRAME_MAGIC);
        buf.put_u64(self.stream_id);
        buf.put_u32(self.index);
        buf.put_u32(self.total);
        buf.put_u32(self.payload_len);
        buf.put_u32(self.checksum);
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(CodecError::frame(format!(
                "header truncated: {} bytes, need {}",
                buf.len(),
                Self::ENCODED_LEN
            )));
        }
        let magic = BigEndian::read_u32(&buf[0..4]);
        if magic != FRAME_MAGIC {
            return Err(CodecError::frame(format!(
                "bad magic {:#010x}, expected {:#010x}",
                magic, FRAME_MAGIC
            )));
        }
        Ok(Self {
            stream_id: BigEndian::read_u64(&buf[4..12]),
            index: BigEndian::read_u32(&buf[12..16]),
            total: BigEndian::read_u32(&buf[16..20]),
            payload_len: BigEndian::read_u32(&buf[20..24]),
            checksum: BigEndian::read_u32(&buf[24..28]),
        })
    }
}

/// One frame ready for transport: encoded header followed by payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Flatten to a single transport buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FrameHeader::ENCODED_LEN + self.payload.len());
        self.header.write_to(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a transport buffer back into a verified frame.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = FrameHeader::read_from(buf)?;
        let body = &buf[FrameHeader::ENCODED_LEN..];
        if body.len() != header.payload_len as usize {
            return Err(CodecError::frame(format!(
                "payload length mismatch: header says {}, got {}",
                header.payload_len,
                body.len()
            )));
        }
        let actual = crc32fast::hash(body);
        if actual != header.checksum {
            return Err(CodecError::ChecksumMismatch {
                stream_id: header.stream_id,
                index: header.index,
                expected: header.checksum,
                actual,
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

/// Split an encoded message into bounded frames.
///
/// Always yields at least one frame so zero-length messages still carry a
/// header the receiver can account for.
pub fn split_frames(stream_id: u64, message: &[u8], max_payload: usize) -> Vec<Frame> {
    assert!(max_payload > 0, "frame payload budget must be positive");
    let chunks: Vec<&[u8]> = if message.is_empty() {
        vec![&[]]
    } else {
        message.chunks(max_payload).collect()
    };
    let total = chunks.len() as u32;

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| Frame {
            header: FrameHeader {
                stream_id,
                index: index as u32,
                total,
                payload_len: chunk.len() as u32,
                checksum: crc32fast::hash(chunk),
            },
            payload: Bytes::copy_from_slice(chunk),
        })
        .collect()
}

/// Receiver-side buffer that stitches frames back into whole messages.
///
/// Frames of one stream arrive in order (transport guarantee), but frames of
/// different streams from the same sender may interleave, so partial streams
/// are keyed by stream id.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: HashMap<u64, PartialMessage>,
}

#[derive(Debug)]
struct PartialMessage {
    next_index: u32,
    total: u32,
    buffer: BytesMut,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one frame. Returns the complete message once the final frame
    /// of its stream arrives, `None` while the stream is still partial.
    pub fn accept(&mut self, frame: Frame) -> Result<Option<Bytes>> {
        let header = frame.header;
        if header.total == 0 || header.index >= header.total {
            return Err(CodecError::frame(format!(
                "inconsistent frame counters: index {} of {}",
                header.index, header.total
            )));
        }

        let partial = self
            .partial
            .entry(header.stream_id)
            .or_insert_with(|| PartialMessage {
                next_index: 0,
                total: header.total,
                buffer: BytesMut::new(),
            });

        if header.index != partial.next_index || header.total != partial.total {
            // Ordered delivery makes this unreachable unless the sender is
            // corrupt; drop the stream so it cannot produce a partial value.
            self.partial.remove(&header.stream_id);
            return Err(CodecError::frame(format!(
                "stream {} out of sequence: frame {}/{}, expected {}",
                header.stream_id, header.index, header.total, header.index
            )));
        }

        partial.buffer.extend_from_slice(&frame.payload);
        partial.next_index += 1;

        if partial.next_index == partial.total {
            let done = self
                .partial
                .remove(&header.stream_id)
                .map(|p| p.buffer.freeze());
            trace!(stream_id = header.stream_id, "reassembled message");
            Ok(done)
        } else {
            Ok(None)
        }
    }

    /// Number of streams currently mid-reassembly.
    pub fn pending_streams(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(message: &[u8], max_payload: usize) -> Bytes {
        let mut reassembler = Reassembler::new();
        let mut result = None;
        for frame in split_frames(77, message, max_payload) {
            let parsed = Frame::from_bytes(&frame.to_bytes()).unwrap();
            if let Some(done) = reassembler.accept(parsed).unwrap() {
                assert!(result.is_none(), "message completed twice");
                result = Some(done);
            }
        }
        result.expect("message never completed")
    }

    #[test]
    fn small_message_is_a_single_frame() {
        let frames = split_frames(1, b"hello", DEFAULT_MAX_FRAME_PAYLOAD);
        assert_eq!(frames.len(), 1);
        assert_eq!(round_trip(b"hello", DEFAULT_MAX_FRAME_PAYLOAD).as_ref(), b"hello");
    }

    #[test]
    fn empty_message_still_frames() {
        assert_eq!(round_trip(b"", 16).len(), 0);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let frame = split_frames(5, b"payload", 64).remove(0);
        let mut raw = frame.to_bytes().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let err = Frame::from_bytes(&raw).unwrap_err();
        assert!(matches!(err, CodecError::ChecksumMismatch { .. }));
    }

    #[test]
    fn interleaved_streams_reassemble_independently() {
        let mut reassembler = Reassembler::new();
        let a = split_frames(1, &[0xaa; 40], 16);
        let b = split_frames(2, &[0xbb; 40], 16);
        assert_eq!(a.len(), 3);

        let mut done = Vec::new();
        for (fa, fb) in a.into_iter().zip(b.into_iter()) {
            if let Some(msg) = reassembler.accept(fa).unwrap() {
                done.push(msg);
            }
            if let Some(msg) = reassembler.accept(fb).unwrap() {
                done.push(msg);
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].as_ref(), &[0xaa; 40]);
        assert_eq!(done[1].as_ref(), &[0xbb; 40]);
        assert_eq!(reassembler.pending_streams(), 0);
    }

    proptest! {
        // Payload sizes straddle the frame boundary by design; very large
        // payloads exercise multi-frame reassembly.
        #[test]
        fn chunking_round_trips_any_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..64 * 1024),
            max_payload in 1usize..8192,
        ) {
            let out = round_trip(&payload, max_payload);
            prop_assert_eq!(out.as_ref(), payload.as_slice());
        }

        #[test]
        fn frame_count_matches_budget(
            len in 1usize..128 * 1024,
            max_payload in 1usize..8192,
        ) {
            let payload = vec![0u8; len];
            let frames = split_frames(3, &payload, max_payload);
            prop_assert_eq!(frames.len(), len.div_ceil(max_payload));
        }
    }
}
