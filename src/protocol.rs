//! Implements the pieces of the Minecraft protocol the verifier needs.

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod nbt;
pub mod packet;
pub mod registry;
pub mod version;

pub use decoder::{DecodeError, Decoder};
pub use encoder::Encoder;

/// Ceiling on any single decoded payload, to avoid out-of-memory DOS.
/// Verification traffic is tiny; anything near this limit is hostile.
pub const BUFFER_LIMIT: usize = 1024 * 1024; // 1 MiB
