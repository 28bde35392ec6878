use crate::protocol::version::ProtocolVersion;
use std::{convert::Infallible, num::TryFromIntError, str::Utf8Error};

/// An error while decoding packet fields.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need at least {0} more bytes")]
    EndOfStream(usize),
    #[error("invalid boolean pattern {0} - expected either 0 or 1")]
    InvalidBool(u8),
    #[error("varint / varlong is too long")]
    VarIntTooLong,
    #[error("string of {length} bytes exceeds cap of {cap}")]
    StringTooLong { length: usize, cap: usize },
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    IntConversion(#[from] TryFromIntError),
    /// Cannot occur; exists so `?` works on infallible conversions.
    #[error(transparent)]
    Infallible(#[from] Infallible),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// Hard cap on any length-prefixed string.
pub const MAX_STRING_LENGTH: usize = i16::MAX as usize;

/// A block position in the verification world.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlockPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// A raw decoder for a Minecraft bitstream.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder from the buffer it will read from.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Gets the remaining buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Returns if there is no data left in the buffer.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes `n` bytes from the buffer, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, buffer) = self.buffer.split_at(n);
            self.buffer = buffer;
            Ok(data)
        } else {
            Err(DecodeError::EndOfStream(n - self.buffer.len()))
        }
    }

    /// Consumes `N` bytes into an array.
    pub fn consume<const N: usize>(&mut self) -> Result<[u8; N]> {
        let data = self.consume_slice(N)?;
        Ok(<[u8; N]>::try_from(data).unwrap())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume::<1>().map(|[x]| x)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.consume().map(i8::from_be_bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume().map(u16::from_be_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.consume().map(i16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.consume().map(i32::from_be_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.consume().map(i64::from_be_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.consume().map(f32::from_be_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.consume().map(f64::from_be_bytes)
    }

    pub fn read_u128(&mut self) -> Result<u128> {
        self.consume().map(u128::from_be_bytes)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let x = self.read_u8()?;
        match x {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidBool(x)),
        }
    }

    /// Reads a VarInt from the stream.
    pub fn read_var_int(&mut self) -> Result<i32> {
        let mut num_read = 0;
        let mut result = 0;

        loop {
            let read = self.read_u8()?;
            let value = i32::from(read & 0b0111_1111);
            result |= value.overflowing_shl(7 * num_read).0;

            num_read += 1;

            if num_read > 5 {
                return Err(DecodeError::VarIntTooLong);
            }
            if read & 0b1000_0000 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Reads a VarLong from the stream.
    pub fn read_var_long(&mut self) -> Result<i64> {
        let mut num_read = 0;
        let mut result = 0;

        loop {
            let read = self.read_u8()?;
            let value = i64::from(read & 0b0111_1111);
            result |= value.overflowing_shl(7 * num_read).0;

            num_read += 1;

            if num_read > 10 {
                return Err(DecodeError::VarIntTooLong);
            }
            if read & 0b1000_0000 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Reads an encoded block position. The bit layout flipped in 1.14.
    pub fn read_block_position(&mut self, version: ProtocolVersion) -> Result<BlockPosition> {
        let value = self.read_i64()?;

        let (x, y, z) = if version >= ProtocolVersion::V1_14 {
            (
                (value >> 38) as i32,
                (value << 52 >> 52) as i32,
                (value << 26 >> 38) as i32,
            )
        } else {
            (
                (value >> 38) as i32,
                (value << 26 >> 52) as i32,
                (value << 38 >> 38) as i32,
            )
        };

        Ok(BlockPosition { x, y, z })
    }

    /// Reads a string no longer than [`MAX_STRING_LENGTH`] bytes.
    pub fn read_string(&mut self) -> Result<&'a str> {
        self.read_string_capped(MAX_STRING_LENGTH)
    }

    /// Reads a string with a per-field cap (usernames are 16 bytes, brands
    /// 64, everything else [`MAX_STRING_LENGTH`]).
    pub fn read_string_capped(&mut self, cap: usize) -> Result<&'a str> {
        let length = usize::try_from(self.read_var_int()?)?;

        if length > cap {
            return Err(DecodeError::StringTooLong { length, cap });
        }

        let bytes = std::str::from_utf8(self.consume_slice(length)?)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoder::Encoder;

    #[test]
    fn varint_roundtrip() {
        for x in [0, 1, 127, 128, 255, 256, 25565, i32::MAX, -1, i32::MIN] {
            let mut buf = Vec::new();
            let written = Encoder::new(&mut buf).write_var_int(x);
            assert!((1..=5).contains(&written));
            assert_eq!(buf.len(), written);
            assert_eq!(Decoder::new(&buf).read_var_int().unwrap(), x);
        }
    }

    #[test]
    fn varint_known_encodings() {
        let mut decoder = Decoder::new(&[0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(decoder.read_var_int().unwrap(), -1);
        let mut decoder = Decoder::new(&[0xdd, 0xc7, 0x01]);
        assert_eq!(decoder.read_var_int().unwrap(), 25565);
    }

    #[test]
    fn varint_too_long() {
        let mut decoder = Decoder::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80]);
        assert!(matches!(
            decoder.read_var_int(),
            Err(DecodeError::VarIntTooLong)
        ));
    }

    #[test]
    fn varlong_roundtrip() {
        for x in [0i64, 1, 127, 128, i64::MAX, -1, i64::MIN] {
            let mut buf = Vec::new();
            Encoder::new(&mut buf).write_var_long(x);
            assert_eq!(Decoder::new(&buf).read_var_long().unwrap(), x);
        }
    }

    #[test]
    fn string_cap_enforced() {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_string("seventeen-chars!!");
        assert!(matches!(
            Decoder::new(&buf).read_string_capped(16),
            Err(DecodeError::StringTooLong { length: 17, cap: 16 })
        ));
        assert_eq!(
            Decoder::new(&buf).read_string_capped(17).unwrap(),
            "seventeen-chars!!"
        );
    }

    #[test]
    fn block_position_roundtrip_modern() {
        let position = BlockPosition { x: 12, y: 255, z: -34 };
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_block_position(position, ProtocolVersion::V1_20);
        let decoded = Decoder::new(&buf)
            .read_block_position(ProtocolVersion::V1_20)
            .unwrap();
        assert_eq!(decoded, position);
    }

    #[test]
    fn block_position_roundtrip_legacy() {
        let position = BlockPosition { x: -100, y: 64, z: 3000 };
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_block_position(position, ProtocolVersion::V1_8);
        let decoded = Decoder::new(&buf)
            .read_block_position(ProtocolVersion::V1_8)
            .unwrap();
        assert_eq!(decoded, position);
    }

    #[test]
    fn block_position_layouts_differ() {
        let position = BlockPosition { x: 8, y: 255, z: 8 };
        let mut modern = Vec::new();
        let mut legacy = Vec::new();
        Encoder::new(&mut modern).write_block_position(position, ProtocolVersion::V1_14);
        Encoder::new(&mut legacy).write_block_position(position, ProtocolVersion::V1_13_2);
        assert_ne!(modern, legacy);
    }

    #[test]
    fn end_of_stream_reports_missing_bytes() {
        let mut decoder = Decoder::new(&[0x00, 0x01]);
        assert!(matches!(
            decoder.read_i64(),
            Err(DecodeError::EndOfStream(6))
        ));
    }
}
