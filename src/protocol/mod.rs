//! Protocol module for chpool
//!
//! Scalar encoding shared by the block transport and the layers above it.

pub mod codec;

pub use codec::{
    get_bool, get_bytes, get_u32, get_u64, get_uvarint, put_bool, put_bytes, put_str, put_u32,
    put_u64, put_uvarint, read_bool, read_bytes, read_string, read_u32, read_u64, read_uvarint,
    write_bool, write_bytes, write_str, write_u32, write_u64, write_uvarint, MAX_VARINT_LEN,
};
