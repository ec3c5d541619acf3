use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::NativeMessagingError;

/// Size of the little-endian length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest frame accepted by default (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Codec for length-prefixed JSON frames.
#[derive(Debug, Clone, Copy)]
pub struct NativeMessageCodec {
    max_frame_len: usize,
}

impl NativeMessageCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Limit the payload size in both directions.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for NativeMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NativeMessageCodec {
    type Item = Value;
    type Error = NativeMessagingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;

        if len > self.max_frame_len {
            return Err(NativeMessagingError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let frame_len = HEADER_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        let value = serde_json::from_slice(&payload)?;
        Ok(Some(value))
    }
}

impl Encoder<Value> for NativeMessageCodec {
    type Error = NativeMessagingError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        let too_large = NativeMessagingError::FrameTooLarge {
            len: payload.len(),
            max: self.max_frame_len,
        };
        if payload.len() > self.max_frame_len {
            return Err(too_large);
        }
        let len = u32::try_from(payload.len()).map_err(|_| too_large)?;

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32_le(len);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn frame(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(payload.len() as u32);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_encode_writes_le_prefix() {
        let mut codec = NativeMessageCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(json!({"ok": true}), &mut dst).unwrap();

        let declared = u32::from_le_bytes(dst[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, dst.len() - HEADER_LEN);
        assert_eq!(&dst[HEADER_LEN..], br#"{"ok":true}"#);
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let mut codec = NativeMessageCodec::new();
        let full = frame(br#"{"type":"cancelled","id":"a"}"#);

        let mut partial = BytesMut::from(&full[..2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut whole = full.clone();
        let value = codec.decode(&mut whole).unwrap().unwrap();
        assert_eq!(value["type"], "cancelled");
        assert!(whole.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut codec = NativeMessageCodec::new();
        let mut buf = frame(br#"{"n":1}"#);
        buf.extend_from_slice(&frame(br#"{"n":2}"#));

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap()["n"], 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap()["n"], 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = NativeMessageCodec::with_max_frame_len(8);
        let mut buf = frame(br#"{"too":"large"}"#);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            NativeMessagingError::FrameTooLarge { len: 15, max: 8 }
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut codec = NativeMessageCodec::with_max_frame_len(4);
        let mut dst = BytesMut::new();
        assert!(codec.encode(json!({"ok": true}), &mut dst).is_err());
        assert!(dst.is_empty());
    }

    #[test]
    fn test_decode_invalid_json() {
        let mut codec = NativeMessageCodec::new();
        let mut buf = frame(b"{nope");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NativeMessagingError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(a, NativeMessageCodec::new());
        let mut reader = FramedRead::new(b, NativeMessageCodec::new());

        let body = "x".repeat(200);
        let send = tokio::spawn(async move {
            writer
                .send(json!({"type": "progress", "path": body}))
                .await
                .unwrap();
        });

        let value = reader.next().await.unwrap().unwrap();
        assert_eq!(value["path"].as_str().unwrap().len(), 200);
        send.await.unwrap();
        assert!(reader.next().await.is_none());
    }
}
