//! Request body buffering
//!
//! Collects a whole request body into one buffer, sized from `Content-Length`
//! when the client declares it.

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, CONTENT_LENGTH};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased request body handed to handlers
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Buffer size used when the client does not declare a length
pub const DEFAULT_BODY_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to read request body: {0}")]
    Read(#[source] BoxError),
}

/// Parse the declared body length, if any
pub fn declared_length(headers: &HeaderMap) -> Result<Option<u64>, BodyError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| BodyError::InvalidContentLength("non-ASCII value".to_string()))?;
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| BodyError::InvalidContentLength(text.to_string()))
}

/// Read the entire body, failing once more than `limit` bytes arrive
pub async fn read_to_bytes(
    mut body: RequestBody,
    declared: Option<u64>,
    default_capacity: usize,
    limit: u64,
) -> Result<Bytes, BodyError> {
    if declared.is_some_and(|len| len > limit) {
        return Err(BodyError::TooLarge { limit });
    }

    let mut buffer: Vec<u8> = Vec::with_capacity(initial_capacity(declared, default_capacity));

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(BodyError::Read)?;
        if let Ok(data) = frame.into_data() {
            let total = buffer.len() as u64 + data.len() as u64;
            if total > limit {
                return Err(BodyError::TooLarge { limit });
            }
            buffer.extend_from_slice(&data);
        }
    }

    Ok(Bytes::from(buffer))
}

/// Up-front reservation: the declared length, never more than `default_capacity`
fn initial_capacity(declared: Option<u64>, default_capacity: usize) -> usize {
    declared
        .and_then(|len| usize::try_from(len).ok())
        .map_or(default_capacity, |len| len.min(default_capacity))
}

/// Body with the given contents
#[cfg(test)]
pub fn full(data: impl Into<Bytes>) -> RequestBody {
    http_body_util::Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Body that yields `prefix` and then fails mid-stream
#[cfg(test)]
pub fn broken(prefix: &'static [u8]) -> RequestBody {
    use hyper::body::Frame;

    let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![
        Ok(Frame::data(Bytes::from_static(prefix))),
        Err("connection reset by peer".into()),
    ];
    http_body_util::StreamBody::new(futures_util::stream::iter(frames)).boxed_unsync()
}
