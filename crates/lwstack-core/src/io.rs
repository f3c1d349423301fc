//! JSON input.
//!
//! Requests piped on stdin are a stream of JSON documents, optionally
//! separated by whitespace. [`JsonDecoder`] yields them one at a time so
//! bulk commands can run once per document.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, CoreError};

const READ_CHUNK: usize = 8 * 1024;

/// Incremental decoder of concatenated JSON documents.
pub struct JsonDecoder<R> {
    reader: R,
    buffer: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> JsonDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            eof: false,
        }
    }

    fn skip_whitespace(&mut self) {
        match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(start) => {
                self.buffer.drain(..start);
            }
            None => self.buffer.clear(),
        }
    }

    /// Parse one document from the buffer. `Ok(None)` means more input is
    /// needed.
    fn parse_buffered(&mut self) -> Result<Option<Value>, CoreError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let parsed = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => Some(Ok((value, stream.byte_offset()))),
                Some(Err(err)) => Some(Err(err)),
                None => None,
            }
        };
        match parsed {
            Some(Ok((value, consumed))) => {
                self.buffer.drain(..consumed);
                Ok(Some(value))
            }
            Some(Err(err)) if err.is_eof() && !self.eof => Ok(None),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }

    /// Next document, `None` at end of input. Reading races `cancel`.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Value>, CoreError> {
        loop {
            self.skip_whitespace();
            if let Some(value) = self.parse_buffered()? {
                return Ok(Some(value));
            }
            if self.eof {
                return Ok(None);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let read = tokio::select! {
                read = self.reader.read(&mut chunk) => read?,
                _ = cancel.cancelled() => return Err(ApiError::cancelled().into()),
            };
            if read == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&chunk[..read]);
            }
        }
    }

    /// Next document decoded as `T`.
    pub async fn next_as<T: DeserializeOwned>(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, CoreError> {
        match self.next(cancel).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// All remaining documents.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<Vec<Value>, CoreError> {
        let mut values = Vec::new();
        while let Some(value) = self.next(cancel).await? {
            values.push(value);
        }
        Ok(values)
    }
}

/// Read every JSON document in the file at `path`. A top-level array is
/// flattened into its elements.
pub async fn read_documents(path: &std::path::Path, cancel: &CancellationToken) -> Result<Vec<Value>, CoreError> {
    let file = tokio::fs::File::open(path).await?;
    let documents = JsonDecoder::new(file).collect(cancel).await?;
    Ok(documents
        .into_iter()
        .flat_map(|document| match document {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_decodes_concatenated_documents() {
        let input: &[u8] = b"{\"a\":1}\n  {\"b\":\n2}{\"c\":[3]}\n";
        let cancel = CancellationToken::new();
        let values = JsonDecoder::new(input).collect(&cancel).await.unwrap();
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2}), json!({"c": [3]})]);
    }

    #[tokio::test]
    async fn test_documents_across_reads() {
        let (mut tx, rx) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"{\"name\": \"a long value\"} {\"n\": 2}").await.unwrap();
        });
        let cancel = CancellationToken::new();
        let mut decoder = JsonDecoder::new(rx);
        assert_eq!(decoder.next(&cancel).await.unwrap(), Some(json!({"name": "a long value"})));
        assert_eq!(decoder.next(&cancel).await.unwrap(), Some(json!({"n": 2})));
        writer.await.unwrap();
        assert_eq!(decoder.next(&cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_document_fails() {
        let input: &[u8] = b"{\"a\": 1} {\"b\":";
        let cancel = CancellationToken::new();
        let mut decoder = JsonDecoder::new(input);
        assert!(decoder.next(&cancel).await.unwrap().is_some());
        assert!(matches!(decoder.next(&cancel).await, Err(CoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let (_tx, rx) = tokio::io::duplex(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = JsonDecoder::new(rx).next(&cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::Api(e) if e.kind == crate::error::ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_read_documents_flattens_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, r#"[{"mapping_key": "a"}, {"mapping_key": "b"}] {"mapping_key": "c"}"#).unwrap();
        let docs = read_documents(&path, &CancellationToken::new()).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2]["mapping_key"], "c");
    }
}
