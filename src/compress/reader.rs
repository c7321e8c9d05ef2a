//! Block-decompressing reader

use super::{checksum, BlockHeader, BLOCK_MAX_SIZE, CHECKSUM_SIZE, COMPRESS_HEADER_SIZE, HEADER_SIZE};
use crate::error::CompressError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Reader that reverses [`CompressWriter`](super::CompressWriter) framing
///
/// Reads always fill the destination completely or fail. While compression
/// is disabled the underlying stream is passed through unchanged.
#[derive(Debug)]
pub struct CompressReader<R> {
    /// Underlying stream
    inner: R,
    /// Whether reads decode blocks
    compressed: bool,
    /// Whether block checksums are verified
    verify_checksum: bool,
    /// Decompressed bytes of the current block
    data: Vec<u8>,
    /// Read cursor into `data`
    pos: usize,
    /// Sub-header and compressed payload of the current block
    raw: Vec<u8>,
}

impl<R> CompressReader<R> {
    /// Create a reader with compression and checksum verification enabled
    pub fn new(inner: R) -> Self {
        CompressReader {
            inner,
            compressed: true,
            verify_checksum: true,
            data: Vec::new(),
            pos: 0,
            raw: Vec::new(),
        }
    }

    /// Enable or disable checksum verification
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Toggle block decoding for subsequent reads
    ///
    /// Bytes already decompressed stay buffered and are served first.
    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    /// Whether reads currently decode blocks
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Number of decompressed bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Get a mutable reference to the underlying stream
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwrap the underlying stream, discarding buffered bytes
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> CompressReader<R> {
    /// Fill `buf` completely
    ///
    /// Returns `buf.len()` on success. Any error, including end of stream,
    /// is returned as is; the bytes copied before it are consumed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CompressError> {
        let mut n = 0;
        while n < buf.len() {
            if self.pos < self.data.len() {
                let take = (self.data.len() - self.pos).min(buf.len() - n);
                buf[n..n + take].copy_from_slice(&self.data[self.pos..self.pos + take]);
                self.pos += take;
                n += take;
                continue;
            }

            if !self.compressed {
                self.inner.read_exact(&mut buf[n..]).await?;
                return Ok(buf.len());
            }

            self.read_block().await?;
        }
        Ok(n)
    }

    /// Decode one block into the decompressed buffer
    async fn read_block(&mut self) -> Result<(), CompressError> {
        let mut header_buf = [0u8; HEADER_SIZE];
        self.inner.read_exact(&mut header_buf).await?;
        let header = BlockHeader::decode(&header_buf)?;

        let payload_size = header.payload_size();
        let decompressed_size = header.decompressed_size as usize;
        if decompressed_size > BLOCK_MAX_SIZE {
            return Err(CompressError::BlockTooLarge(decompressed_size));
        }
        if payload_size > lz4_flex::block::get_maximum_output_size(BLOCK_MAX_SIZE) {
            return Err(CompressError::BlockTooLarge(payload_size));
        }

        self.raw.clear();
        self.raw.extend_from_slice(&header_buf[CHECKSUM_SIZE..]);
        self.raw.resize(COMPRESS_HEADER_SIZE + payload_size, 0);
        self.inner
            .read_exact(&mut self.raw[COMPRESS_HEADER_SIZE..])
            .await?;

        if self.verify_checksum {
            let actual = checksum(&self.raw);
            if actual != header.checksum {
                return Err(CompressError::ChecksumMismatch {
                    expected: header.checksum,
                    actual,
                });
            }
        }

        self.pos = 0;
        self.data.resize(decompressed_size, 0);
        let result =
            lz4_flex::block::decompress_into(&self.raw[COMPRESS_HEADER_SIZE..], &mut self.data);
        match result {
            Ok(n) if n == decompressed_size => {
                trace!(
                    "Read block: {} bytes -> {} bytes",
                    HEADER_SIZE + payload_size,
                    decompressed_size
                );
                Ok(())
            }
            Ok(n) => {
                self.data.clear();
                Err(CompressError::SizeMismatch {
                    expected: decompressed_size,
                    actual: n,
                })
            }
            Err(e) => {
                self.data.clear();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::CompressWriter;

    async fn encode(chunks: &[&[u8]], block_size: usize) -> Vec<u8> {
        let mut writer = CompressWriter::new(Vec::new()).with_block_size(block_size);
        for chunk in chunks {
            writer.write(chunk).await.unwrap();
        }
        writer.flush().await.unwrap();
        writer.into_inner()
    }

    #[tokio::test]
    async fn test_read_single_block() {
        let encoded = encode(&[b"SELECT 1"], BLOCK_MAX_SIZE).await;
        let mut reader = CompressReader::new(&encoded[..]);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 8);
        assert_eq!(&buf, b"SELECT 1");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_read_fragmented_block() {
        let encoded = encode(&[b"fragmented block"], BLOCK_MAX_SIZE).await;
        let inner = tokio_test::io::Builder::new()
            .read(&encoded[..7])
            .read(&encoded[7..30])
            .read(&encoded[30..])
            .build();
        let mut reader = CompressReader::new(inner);

        let mut buf = [0u8; 16];
        reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"fragmented block");
    }

    #[tokio::test]
    async fn test_read_spans_blocks() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let encoded = encode(&[&payload], 100).await;
        let mut reader = CompressReader::new(&encoded[..]);

        let mut buf = vec![0u8; 1000];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1000);
        assert_eq!(buf, payload);
    }

    #[tokio::test]
    async fn test_read_in_small_pieces() {
        let encoded = encode(&[b"abcdef", b"ghij"], BLOCK_MAX_SIZE).await;
        let mut reader = CompressReader::new(&encoded[..]);

        let mut buf = [0u8; 3];
        reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(reader.buffered(), 7);
        reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"def");
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let encoded = encode(&[b"abc"], BLOCK_MAX_SIZE).await;
        let mut reader = CompressReader::new(&encoded[..]);

        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_short_payload_is_error() {
        let encoded = encode(&[&[5u8; 4096]], BLOCK_MAX_SIZE).await;
        let truncated = &encoded[..encoded.len() - 1];
        let mut reader = CompressReader::new(truncated);

        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let mut encoded = encode(&[b"abc"], BLOCK_MAX_SIZE).await;
        encoded[CHECKSUM_SIZE] = 0x90;
        let mut reader = CompressReader::new(&encoded[..]);

        let mut buf = [0u8; 3];
        assert!(matches!(
            reader.read(&mut buf).await,
            Err(CompressError::UnknownMethod(0x90))
        ));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_detected() {
        let mut encoded = encode(&[b"checksummed payload"], BLOCK_MAX_SIZE).await;
        encoded[0] ^= 0xff;
        let mut reader = CompressReader::new(&encoded[..]);

        let mut buf = [0u8; 19];
        assert!(matches!(
            reader.read(&mut buf).await,
            Err(CompressError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_checksum_verification_can_be_disabled() {
        let mut encoded = encode(&[b"checksummed payload"], BLOCK_MAX_SIZE).await;
        encoded[0] ^= 0xff;
        let mut reader = CompressReader::new(&encoded[..]).verify_checksum(false);

        let mut buf = [0u8; 19];
        reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"checksummed payload");
    }

    #[tokio::test]
    async fn test_oversized_block_rejected() {
        let mut header = [0u8; HEADER_SIZE];
        header[CHECKSUM_SIZE] = 0x82;
        header[17..21].copy_from_slice(&10u32.to_le_bytes());
        header[21..25].copy_from_slice(&((BLOCK_MAX_SIZE + 1) as u32).to_le_bytes());
        let mut reader = CompressReader::new(&header[..]);

        let mut buf = [0u8; 1];
        assert!(matches!(
            reader.read(&mut buf).await,
            Err(CompressError::BlockTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_pass_through_mode() {
        let raw = b"uncompressed bytes".to_vec();
        let mut reader = CompressReader::new(&raw[..]);
        reader.set_compressed(false);
        assert!(!reader.is_compressed());

        let mut buf = vec![0u8; raw.len()];
        reader.read(&mut buf).await.unwrap();
        assert_eq!(buf, raw);
    }

    #[tokio::test]
    async fn test_switching_keeps_buffered_bytes() {
        let mut stream = encode(&[b"packed"], BLOCK_MAX_SIZE).await;
        stream.extend_from_slice(b"plain");
        let mut reader = CompressReader::new(&stream[..]);

        let mut buf = [0u8; 2];
        reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pa");

        reader.set_compressed(false);
        let mut rest = [0u8; 9];
        reader.read(&mut rest).await.unwrap();
        assert_eq!(&rest, b"ckedplain");
    }
}
