//! Newline framing for streamed HTTP bodies (SSE and NDJSON).

use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::providers::provider::ProviderError;

pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Split a streamed response body into lines without trailing `\r\n`.
///
/// A final unterminated line is still yielded.
pub fn response_lines(response: reqwest::Response) -> LineStream {
    Box::pin(async_stream::stream! {
        let mut bytes = std::pin::pin!(response.bytes_stream());
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(e) => {
                    yield Err(ProviderError::HttpError(e));
                    return;
                }
            }

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                yield Ok(decode_line(&line));
            }
        }

        if !buffer.is_empty() {
            yield Ok(decode_line(&buffer));
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
