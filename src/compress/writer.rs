//! Block-compressing writer

use super::{checksum, BlockHeader, Method, BLOCK_MAX_SIZE, CHECKSUM_SIZE, HEADER_SIZE};
use crate::error::CompressError;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Writer that frames plaintext into compressed, checksummed blocks
///
/// Bytes passed to [`write`](Self::write) are accumulated until the block is
/// full, at which point the block is emitted automatically. Call
/// [`flush`](Self::flush) to emit a partially filled block.
#[derive(Debug)]
pub struct CompressWriter<W> {
    /// Underlying sink
    inner: W,
    /// Plaintext accumulated for the current block
    data: Vec<u8>,
    /// Staging buffer holding one encoded block
    compressed: Vec<u8>,
    /// Automatic flush threshold
    block_size: usize,
}

impl<W> CompressWriter<W> {
    /// Create a writer with the default 128 MiB block size
    pub fn new(inner: W) -> Self {
        CompressWriter {
            inner,
            data: Vec::new(),
            compressed: Vec::new(),
            block_size: BLOCK_MAX_SIZE,
        }
    }

    /// Lower the automatic flush threshold, clamped to `1..=BLOCK_MAX_SIZE`
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.clamp(1, BLOCK_MAX_SIZE);
        self
    }

    /// Automatic flush threshold
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of plaintext bytes waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.data.len()
    }

    /// Get a reference to the underlying sink
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Get a mutable reference to the underlying sink
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the underlying sink, discarding unflushed bytes
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> CompressWriter<W> {
    /// Append bytes, emitting a block each time the buffer fills up
    ///
    /// Returns the number of bytes consumed, which is always `buf.len()` on
    /// success. If emitting a block fails, the rest of `buf` is not processed
    /// and the error is [`CompressError::PartialWrite`], carrying the count
    /// consumed so far (including the lost block).
    pub async fn write(&mut self, mut buf: &[u8]) -> Result<usize, CompressError> {
        let mut written = 0;
        while !buf.is_empty() {
            let room = self.block_size - self.data.len();
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            written += n;
            buf = &buf[n..];

            if self.data.len() == self.block_size {
                if let Err(e) = self.flush().await {
                    return Err(CompressError::PartialWrite {
                        written,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(written)
    }

    /// Compress and emit the buffered bytes as one block
    ///
    /// Does nothing when the buffer is empty.
    pub async fn flush(&mut self) -> Result<(), CompressError> {
        if self.data.is_empty() {
            return Ok(());
        }

        let bound = lz4_flex::block::get_maximum_output_size(self.data.len());
        self.compressed.resize(HEADER_SIZE + bound, 0);
        let compressed_len =
            lz4_flex::block::compress_into(&self.data, &mut self.compressed[HEADER_SIZE..])?;
        let end = HEADER_SIZE + compressed_len;

        let mut header = BlockHeader {
            checksum: 0,
            method: Method::Lz4,
            compressed_size: (end - CHECKSUM_SIZE) as u32,
            decompressed_size: self.data.len() as u32,
        };
        let mut sub_header = &mut self.compressed[CHECKSUM_SIZE..HEADER_SIZE];
        header.encode_sub_header(&mut sub_header);
        header.checksum = checksum(&self.compressed[CHECKSUM_SIZE..end]);
        self.compressed[..CHECKSUM_SIZE].copy_from_slice(&header.checksum.to_le_bytes());

        trace!(
            "Flushing block: {} bytes -> {} bytes",
            header.decompressed_size,
            end
        );

        // A block that fails to write is dropped, not retried
        self.data.clear();
        self.inner.write_all(&self.compressed[..end]).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
