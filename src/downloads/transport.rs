use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, RANGE};

use crate::core::error::Result;

/// A single GET, optionally starting at a byte offset.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub url: &'a str,
    pub offset: u64,
    pub headers: &'a [(String, String)],
}

pub struct TransferResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// First byte of a `Content-Range: bytes a-b/total` reply.
    pub range_start: Option<u64>,
    /// Total size from a `Content-Range: bytes a-b/total` header.
    pub range_total: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for TransferResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("range_start", &self.range_start)
            .field("range_total", &self.range_total)
            .finish_non_exhaustive()
    }
}

/// Opens remote bodies for the transfer loop.
pub trait Transport: Send + Sync {
    fn open(&self, request: &TransferRequest<'_>) -> Result<TransferResponse>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `read_timeout` bounds every individual socket read; `None` waits forever.
    pub fn new(user_agent: &str, read_timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: &TransferRequest<'_>) -> Result<TransferResponse> {
        let mut builder = self.client.get(request.url);
        for (name, value) in request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.offset));
        }
        let response = builder.send()?;
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_range = content_range.as_deref();
        Ok(TransferResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            range_start: content_range.and_then(parse_range_start),
            range_total: content_range.and_then(parse_range_total),
            body: Box::new(response),
        })
    }
}

fn byte_range(value: &str) -> Option<&str> {
    let (unit, rest) = value.trim().split_once(' ')?;
    unit.eq_ignore_ascii_case("bytes").then_some(rest)
}

/// Total from `bytes 100-999/1000`; `None` for `*` or malformed values.
pub fn parse_range_total(value: &str) -> Option<u64> {
    byte_range(value)?.rsplit_once('/')?.1.trim().parse().ok()
}

/// Start from `bytes 100-999/1000`; `None` for `bytes */1000` or malformed values.
pub fn parse_range_start(value: &str) -> Option<u64> {
    let (range, _) = byte_range(value)?.split_once('/')?;
    range.split_once('-')?.0.trim().parse().ok()
}
