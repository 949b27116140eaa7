use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::encoding::encode_wide;
use crate::error::FrameError;
use crate::framer::{FrameConfig, FramedUnit, MessageFramer};

/// Tokio codec for MOS documents.
///
/// Decodes a UTF-16BE byte stream into [`FramedUnit`]s and encodes outgoing
/// document strings as UTF-16BE. Use with `tokio_util::codec::FramedRead` and
/// `FramedWrite` on the halves of a MOS channel stream.
#[derive(Debug, Default)]
pub struct MosCodec {
    framer: MessageFramer,
}

impl MosCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            framer: MessageFramer::with_config(config),
        }
    }
}

impl Decoder for MosCodec {
    type Item = FramedUnit;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.framer.push(&chunk);
        }
        Ok(self.framer.next_unit())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(unit) => Ok(Some(unit)),
            None => Ok(self.framer.finish()),
        }
    }
}

impl<T> Encoder<T> for MosCodec
where
    T: AsRef<str>,
{
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_wide(item.as_ref(), dst);
        Ok(())
    }
}
