//! Lazily produced values stored under a key.

use crate::error::{Result, StashError};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::fmt;

/// A single-pass stream of byte chunks with an optional declared size.
///
/// Consuming methods take `self`, so a content handle cannot be read twice;
/// callers that need the bytes more than once materialise them with
/// [`Content::bytes`] first.
pub struct Content {
    size: Option<u64>,
    stream: BoxStream<'static, Result<Bytes>>,
}

impl Content {
    pub fn empty() -> Self {
        Self {
            size: Some(0),
            stream: stream::empty().boxed(),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            return Self::empty();
        }
        Self {
            size: Some(data.len() as u64),
            stream: stream::once(async move { Ok(data) }).boxed(),
        }
    }

    pub fn from_stream<S>(stream: S, size: Option<u64>) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            size,
            stream: stream.boxed(),
        }
    }

    /// Declared total size, if the producer knows it up front.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        self.stream
    }

    /// Drains the stream into a single buffer. The declared size is not
    /// trusted; the buffer is sized from the chunks actually read.
    pub async fn bytes(self) -> Result<Bytes> {
        let mut stream = self.stream;
        let mut chunks: Vec<Bytes> = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            if !chunk.is_empty() {
                chunks.push(chunk);
            }
        }

        match chunks.len() {
            0 => Ok(Bytes::new()),
            1 => Ok(chunks.remove(0)),
            _ => {
                let total = chunks.iter().map(Bytes::len).sum();
                let mut buf = BytesMut::with_capacity(total);
                for chunk in chunks {
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StashError::Backend(format!("content is not valid utf-8: {}", e)))
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").field("size", &self.size).finish_non_exhaustive()
    }
}

impl From<Bytes> for Content {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for Content {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl From<String> for Content {
    fn from(data: String) -> Self {
        Self::from_bytes(data)
    }
}

impl From<&'static str> for Content {
    fn from(data: &'static str) -> Self {
        Self::from_bytes(data)
    }
}
