//! The frame layer: length-prefixed varint framing with an optional zlib
//! compression wrapper, as negotiated by `SetCompression` during login.

use crate::protocol::{
    decoder::{DecodeError, Decoder},
    encoder::{var_int_size, Encoder},
};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::{Read, Write};

/// The limbo dialogue only ever sends small packets, so compression speed
/// is preferred over ratio.
const COMPRESSION_LEVEL: Compression = Compression::fast();

/// The frame length prefix may occupy at most 3 varint bytes.
pub const MAX_FRAME_LENGTH: usize = 2_097_151;

/// A fatal error in the frame layer. Any of these closes the socket.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {length} bytes exceeds ceiling of {ceiling}")]
    FrameTooLarge { length: usize, ceiling: usize },
    #[error("frame length prefix is longer than 3 bytes")]
    LengthPrefixTooLong,
    #[error("declared inflated size {declared} does not match actual size {actual}")]
    CompressionMismatch { declared: usize, actual: usize },
    #[error("zlib: {0}")]
    Zlib(std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// Threshold in bytes above which a packet body is compressed.
#[derive(Copy, Clone, Debug)]
pub struct CompressionThreshold(pub usize);

/// A decoded frame: the packet id varint and the decompressed payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub packet_id: i32,
    pub payload: Vec<u8>,
}

/// Codec state for one connection direction pair.
pub struct FrameCodec {
    /// Buffered incoming bytes.
    read_buffer: Vec<u8>,
    compression: Option<CompressionThreshold>,
    /// Payload ceiling; inbound frames above this are fatal.
    ceiling: usize,
}

impl FrameCodec {
    pub fn new(ceiling: usize) -> Self {
        Self {
            read_buffer: Vec::new(),
            compression: None,
            ceiling: ceiling.min(MAX_FRAME_LENGTH),
        }
    }

    /// Turns on the compression wrapper for all subsequent frames, both
    /// directions. Must be called after `SetCompression` has been flushed.
    pub fn enable_compression(&mut self, threshold: CompressionThreshold) {
        assert!(
            self.compression.is_none(),
            "called enable_compression() multiple times"
        );
        self.compression = Some(threshold);
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression.is_some()
    }

    /// Gives received data to the internal read buffer.
    /// Call `next_frame` in a loop afterwards.
    pub fn give_data(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Attempts to decode one frame.
    ///
    /// * `Ok(None)` — not enough data buffered yet.
    /// * `Ok(Some(frame))` — a frame was read; more may be available.
    /// * `Err(e)` — the stream is invalid and must be closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let (length, prefix_size) = match self.read_frame_length()? {
            Some(x) => x,
            None => return Ok(None),
        };

        if length > self.ceiling {
            return Err(CodecError::FrameTooLarge {
                length,
                ceiling: self.ceiling,
            });
        }
        if self.read_buffer.len() < prefix_size + length {
            return Ok(None);
        }

        let body = &self.read_buffer[prefix_size..prefix_size + length];
        let inner = match self.compression {
            Some(_) => {
                let mut decoder = Decoder::new(body);
                let declared = usize::try_from(decoder.read_var_int()?)
                    .map_err(DecodeError::from)?;
                if declared == 0 {
                    decoder.buffer().to_vec()
                } else {
                    if declared > self.ceiling {
                        return Err(CodecError::FrameTooLarge {
                            length: declared,
                            ceiling: self.ceiling,
                        });
                    }
                    let mut inflated = Vec::with_capacity(declared);
                    ZlibDecoder::new(decoder.buffer())
                        .take(self.ceiling as u64 + 1)
                        .read_to_end(&mut inflated)
                        .map_err(CodecError::Zlib)?;
                    if inflated.len() != declared {
                        return Err(CodecError::CompressionMismatch {
                            declared,
                            actual: inflated.len(),
                        });
                    }
                    inflated
                }
            }
            None => body.to_vec(),
        };

        self.read_buffer.drain(..prefix_size + length);

        let mut decoder = Decoder::new(&inner);
        let packet_id = decoder.read_var_int()?;
        let payload = decoder.buffer().to_vec();
        Ok(Some(Frame { packet_id, payload }))
    }

    /// Reads the frame length prefix, honoring the 3-byte limit.
    fn read_frame_length(&self) -> Result<Option<(usize, usize)>> {
        let mut value: i32 = 0;
        for (i, &byte) in self.read_buffer.iter().take(3).enumerate() {
            value |= i32::from(byte & 0b0111_1111) << (7 * i);
            if byte & 0b1000_0000 == 0 {
                let length =
                    usize::try_from(value).map_err(|e| CodecError::Decode(e.into()))?;
                return Ok(Some((length, i + 1)));
            }
        }
        if self.read_buffer.len() >= 3 {
            return Err(CodecError::LengthPrefixTooLong);
        }
        Ok(None)
    }

    /// Encodes a packet-id and already-encoded payload into a wire frame.
    pub fn encode_frame(&mut self, packet_id: i32, payload: &[u8]) -> Result<Vec<u8>> {
        let mut inner = Vec::with_capacity(payload.len() + 5);
        Encoder::new(&mut inner).write_var_int(packet_id);
        inner.extend_from_slice(payload);

        let mut frame = Vec::with_capacity(inner.len() + 10);
        let mut encoder = Encoder::new(&mut frame);
        match self.compression {
            Some(CompressionThreshold(threshold)) => {
                if inner.len() >= threshold {
                    let mut zlib = ZlibEncoder::new(Vec::new(), COMPRESSION_LEVEL);
                    zlib.write_all(&inner).map_err(CodecError::Zlib)?;
                    let deflated = zlib.finish().map_err(CodecError::Zlib)?;
                    let declared = inner.len() as i32;
                    encoder
                        .write_var_int((var_int_size(declared) + deflated.len()) as i32);
                    encoder.write_var_int(declared);
                    encoder.write_slice(&deflated);
                } else {
                    encoder.write_var_int((inner.len() + 1) as i32);
                    encoder.write_var_int(0);
                    encoder.write_slice(&inner);
                }
            }
            None => {
                encoder.write_var_int(inner.len() as i32);
                encoder.write_slice(&inner);
            }
        }
        Ok(frame)
    }
}
