//! Scalar codec for the native protocol
//!
//! Fixed-width integers are little-endian, unsigned integers use base-128
//! varints, booleans are one byte and byte strings are `uvarint(len) || bytes`.
//! The `put_*`/`get_*` functions work on in-memory buffers, while the
//! `read_*`/`write_*` functions work directly on async streams.

use bytes::{Buf, BufMut, Bytes};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Largest byte string accepted on read
pub const MAX_BYTES_LEN: usize = crate::compress::BLOCK_MAX_SIZE;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn ensure_remaining<B: Buf>(src: &B, n: usize) -> io::Result<()> {
    if src.remaining() < n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("need {} bytes, {} remaining", n, src.remaining()),
        ));
    }
    Ok(())
}

fn check_bytes_len(len: u64) -> io::Result<usize> {
    usize::try_from(len)
        .ok()
        .filter(|n| *n <= MAX_BYTES_LEN)
        .ok_or_else(|| invalid_data(format!("byte string length {} too large", len)))
}

/// Incremental base-128 varint decoder shared by the buffer and stream readers
#[derive(Debug, Default)]
struct VarintDecoder {
    value: u64,
    shift: u32,
    len: usize,
}

impl VarintDecoder {
    /// Feed one byte; returns the value once the last byte has been seen
    fn push(&mut self, byte: u8) -> io::Result<Option<u64>> {
        self.len += 1;
        if self.len == MAX_VARINT_LEN && byte > 1 {
            return Err(invalid_data("varint overflows a 64-bit integer"));
        }
        if byte < 0x80 {
            return Ok(Some(self.value | (u64::from(byte) << self.shift)));
        }
        self.value |= u64::from(byte & 0x7f) << self.shift;
        self.shift += 7;
        Ok(None)
    }
}

/// Append a boolean as a single byte
pub fn put_bool<B: BufMut>(dst: &mut B, v: bool) {
    dst.put_u8(u8::from(v));
}

/// Append a little-endian u32
pub fn put_u32<B: BufMut>(dst: &mut B, v: u32) {
    dst.put_u32_le(v);
}

/// Append a little-endian u64
pub fn put_u64<B: BufMut>(dst: &mut B, v: u64) {
    dst.put_u64_le(v);
}

/// Append an unsigned varint
pub fn put_uvarint<B: BufMut>(dst: &mut B, mut v: u64) {
    while v >= 0x80 {
        dst.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    dst.put_u8(v as u8);
}

/// Append a length-prefixed byte string
pub fn put_bytes<B: BufMut>(dst: &mut B, v: &[u8]) {
    put_uvarint(dst, v.len() as u64);
    dst.put_slice(v);
}

/// Append a length-prefixed UTF-8 string
pub fn put_str<B: BufMut>(dst: &mut B, v: &str) {
    put_bytes(dst, v.as_bytes());
}

/// Read a boolean; any byte other than 1 is false
pub fn get_bool<B: Buf>(src: &mut B) -> io::Result<bool> {
    ensure_remaining(src, 1)?;
    Ok(src.get_u8() == 1)
}

/// Read a little-endian u32
pub fn get_u32<B: Buf>(src: &mut B) -> io::Result<u32> {
    ensure_remaining(src, 4)?;
    Ok(src.get_u32_le())
}

/// Read a little-endian u64
pub fn get_u64<B: Buf>(src: &mut B) -> io::Result<u64> {
    ensure_remaining(src, 8)?;
    Ok(src.get_u64_le())
}

/// Read an unsigned varint
pub fn get_uvarint<B: Buf>(src: &mut B) -> io::Result<u64> {
    let mut decoder = VarintDecoder::default();
    loop {
        ensure_remaining(src, 1)?;
        if let Some(v) = decoder.push(src.get_u8())? {
            return Ok(v);
        }
    }
}

/// Read a length-prefixed byte string
pub fn get_bytes<B: Buf>(src: &mut B) -> io::Result<Bytes> {
    let len = check_bytes_len(get_uvarint(src)?)?;
    ensure_remaining(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Read a boolean from a stream
pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<bool> {
    Ok(r.read_u8().await? == 1)
}

/// Read a little-endian u32 from a stream
pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u32> {
    r.read_u32_le().await
}

/// Read a little-endian u64 from a stream
pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u64> {
    r.read_u64_le().await
}

/// Read an unsigned varint from a stream
pub async fn read_uvarint<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u64> {
    let mut decoder = VarintDecoder::default();
    loop {
        if let Some(v) = decoder.push(r.read_u8().await?)? {
            return Ok(v);
        }
    }
}

/// Read a length-prefixed byte string from a stream
///
/// A zero length yields an empty vector.
pub async fn read_bytes<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = check_bytes_len(read_uvarint(r).await?)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read a length-prefixed UTF-8 string from a stream
pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<String> {
    let buf = read_bytes(r).await?;
    String::from_utf8(buf).map_err(|e| invalid_data(e.to_string()))
}

/// Write a boolean to a stream
pub async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, v: bool) -> io::Result<()> {
    w.write_u8(u8::from(v)).await
}

/// Write a little-endian u32 to a stream
pub async fn write_u32<W: AsyncWrite + Unpin>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32_le(v).await
}

/// Write a little-endian u64 to a stream
pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64_le(v).await
}

/// Write an unsigned varint to a stream
pub async fn write_uvarint<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> io::Result<()> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    put_uvarint(&mut buf, v);
    w.write_all(&buf).await
}

/// Write a length-prefixed byte string to a stream
pub async fn write_bytes<W: AsyncWrite + Unpin>(w: &mut W, v: &[u8]) -> io::Result<()> {
    write_uvarint(w, v.len() as u64).await?;
    w.write_all(v).await
}

/// Write a length-prefixed UTF-8 string to a stream
pub async fn write_str<W: AsyncWrite + Unpin>(w: &mut W, v: &str) -> io::Result<()> {
    write_bytes(w, v.as_bytes()).await
}
