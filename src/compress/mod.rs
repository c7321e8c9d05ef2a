//! Compressed block transport
//!
//! Every block on the wire is laid out as
//!
//! ```text
//! [0..16)  CityHash128 checksum of bytes [16..end)
//! [16]     method tag (0x82 = LZ4)
//! [17..21) compressed payload size + 9, little-endian
//! [21..25) decompressed size, little-endian
//! [25..)   compressed payload
//! ```
//!
//! [`CompressWriter`] accumulates plaintext into blocks of at most
//! [`BLOCK_MAX_SIZE`] bytes and [`CompressReader`] reverses the framing.

mod reader;
mod writer;

pub use reader::CompressReader;
pub use writer::CompressWriter;

use crate::error::CompressError;
use crate::protocol::codec::{get_u32, put_u32};
use bytes::{Buf, BufMut};

/// Size of the checksum prefix
pub const CHECKSUM_SIZE: usize = 16;

/// Size of the method + two length fields sub-header
pub const COMPRESS_HEADER_SIZE: usize = 9;

/// Full block header size
pub const HEADER_SIZE: usize = CHECKSUM_SIZE + COMPRESS_HEADER_SIZE;

/// Maximum plaintext accumulated into a single block (128 MiB)
pub const BLOCK_MAX_SIZE: usize = 128 << 20;

/// Compression method tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    /// LZ4 block format
    Lz4 = 0x82,
}

impl From<Method> for u8 {
    fn from(method: Method) -> Self {
        method as u8
    }
}

impl TryFrom<u8> for Method {
    type Error = CompressError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x82 => Ok(Method::Lz4),
            other => Err(CompressError::UnknownMethod(other)),
        }
    }
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Checksum over the sub-header and payload
    pub checksum: u128,
    /// Compression method
    pub method: Method,
    /// Stored compressed size, which includes the 9-byte sub-header
    pub compressed_size: u32,
    /// Plaintext size
    pub decompressed_size: u32,
}

impl BlockHeader {
    /// Decode a header from its first [`HEADER_SIZE`] bytes
    pub fn decode(src: &[u8]) -> Result<Self, CompressError> {
        if src.len() < HEADER_SIZE {
            return Err(CompressError::InvalidHeader(format!(
                "need {} bytes, got {}",
                HEADER_SIZE,
                src.len()
            )));
        }
        let mut src = &src[..HEADER_SIZE];
        let mut checksum = [0u8; CHECKSUM_SIZE];
        src.copy_to_slice(&mut checksum);
        let method = Method::try_from(src.get_u8())?;
        let compressed_size = get_u32(&mut src)?;
        let decompressed_size = get_u32(&mut src)?;

        if (compressed_size as usize) < COMPRESS_HEADER_SIZE {
            return Err(CompressError::InvalidHeader(format!(
                "compressed size {} is smaller than the {}-byte sub-header",
                compressed_size, COMPRESS_HEADER_SIZE
            )));
        }

        Ok(BlockHeader {
            checksum: u128::from_le_bytes(checksum),
            method,
            compressed_size,
            decompressed_size,
        })
    }

    /// Encode the header
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_slice(&self.checksum.to_le_bytes());
        self.encode_sub_header(dst);
    }

    /// Encode the 9 bytes covered by the checksum
    pub fn encode_sub_header<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.method.into());
        put_u32(dst, self.compressed_size);
        put_u32(dst, self.decompressed_size);
    }

    /// Length of the compressed payload following the header
    pub fn payload_size(&self) -> usize {
        self.compressed_size as usize - COMPRESS_HEADER_SIZE
    }
}

/// Compute the block checksum over the sub-header and payload
///
/// The first CityHash128 word occupies the low 64 bits so that it leads
/// the little-endian wire encoding.
pub fn checksum(data: &[u8]) -> u128 {
    cityhash_rs::cityhash_102_128(data).rotate_right(64)
}
