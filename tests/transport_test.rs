//! Integration tests for the compressed block transport

mod common;

use chpool::compress::{BlockHeader, CompressReader, CompressWriter, BLOCK_MAX_SIZE, CHECKSUM_SIZE};
use chpool::config::parse_config;
use chpool::pool::Pool;
use chpool::transport::{TcpConnection, TcpConnector};
use common::{create_tcp_stream_pair, create_test_listener};

const CHUNK: usize = 1 << 20;

/// Ascending byte pattern starting at `offset`
fn pattern(offset: usize, len: usize) -> Vec<u8> {
    (offset..offset + len).map(|i| i as u8).collect()
}

#[tokio::test]
async fn test_large_round_trip_spans_blocks() {
    let total = 200 << 20;

    let mut writer = CompressWriter::new(Vec::new());
    let mut offset = 0;
    while offset < total {
        let n = writer.write(&pattern(offset, CHUNK)).await.unwrap();
        assert_eq!(n, CHUNK);
        offset += CHUNK;
    }
    assert_eq!(writer.buffered(), total - BLOCK_MAX_SIZE);
    writer.flush().await.unwrap();
    let encoded = writer.into_inner();

    // One automatic flush at the block limit plus the final one
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < encoded.len() {
        let header = BlockHeader::decode(&encoded[pos..]).unwrap();
        blocks.push(header.decompressed_size as usize);
        pos += CHECKSUM_SIZE + header.compressed_size as usize;
    }
    assert_eq!(pos, encoded.len());
    assert_eq!(blocks, vec![BLOCK_MAX_SIZE, total - BLOCK_MAX_SIZE]);

    let mut reader = CompressReader::new(encoded.as_slice());
    let mut buf = vec![0u8; CHUNK];
    let mut offset = 0;
    while offset < total {
        reader.read(&mut buf).await.unwrap();
        assert!(buf == pattern(offset, CHUNK), "mismatch in chunk at {}", offset);
        offset += CHUNK;
    }

    let err = reader.read(&mut buf[..1]).await.unwrap_err();
    assert!(err.is_eof());
}

#[tokio::test]
async fn test_blocks_over_tcp() {
    let (client, server) = create_tcp_stream_pair().await;
    let mut client = TcpConnection::new(client, true);
    let mut server = TcpConnection::new(server, true);

    let payload = pattern(7, 300_000);
    client.send(&payload).await.unwrap();
    client.send(b"tail").await.unwrap();

    let mut received = vec![0u8; payload.len() + 4];
    server.recv_exact(&mut received).await.unwrap();
    assert_eq!(&received[..payload.len()], payload.as_slice());
    assert_eq!(&received[payload.len()..], b"tail");
}

#[tokio::test]
async fn test_pool_over_tcp() {
    let (listener, addr) = create_test_listener().await;

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut conn = TcpConnection::new(stream, true);
                let mut buf = [0u8; 4];
                while conn.recv_exact(&mut buf).await.is_ok() {
                    buf.reverse();
                    if conn.send(&buf).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let config = parse_config(&format!(
        "clickhouse://{}/default?pool_max_conns=2&compress=1",
        addr
    ))
    .unwrap();
    let pool = Pool::connect(config, TcpConnector::with_defaults())
        .await
        .unwrap();

    for _ in 0..3 {
        let mut lease = pool.acquire().await.unwrap();
        let conn = lease.conn_mut().unwrap();
        conn.send(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        conn.recv_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"gnip");
        lease.release();
    }

    let stat = pool.stat();
    assert_eq!(stat.total_conns, 1);
    assert_eq!(stat.idle_conns, 1);
    assert_eq!(stat.acquire_count, 3);

    pool.close().await;
}
