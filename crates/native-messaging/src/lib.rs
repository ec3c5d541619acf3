//! Framing for the browser native messaging wire format.
//!
//! Every message is a UTF-8 JSON document preceded by its byte length as a
//! 32-bit little-endian integer. [`NativeMessageCodec`] plugs into
//! `tokio_util::codec::{FramedRead, FramedWrite}`; the free functions cover
//! one-off encoding and decoding.

pub mod codec;
pub mod error;

pub use crate::{
    codec::{DEFAULT_MAX_FRAME_LEN, HEADER_LEN, NativeMessageCodec},
    error::NativeMessagingError,
};

use bytes::BytesMut;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::codec::{Decoder, Encoder};

/// Encode a single message into a length-prefixed frame.
pub fn encode_message<T: Serialize>(message: &T) -> Result<BytesMut, NativeMessagingError> {
    let value = serde_json::to_value(message)?;
    let mut codec = NativeMessageCodec::new();
    let mut dst = BytesMut::new();
    codec.encode(value, &mut dst)?;
    Ok(dst)
}

/// Decode the next complete frame from `src` into a typed message.
///
/// Returns `Ok(None)` when `src` does not yet hold a whole frame.
pub fn decode_message<T: DeserializeOwned>(
    src: &mut BytesMut,
) -> Result<Option<T>, NativeMessagingError> {
    let mut codec = NativeMessageCodec::new();
    match codec.decode(src)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}
