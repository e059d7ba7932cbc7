//! Transport-neutral message and the retry side channel.
//!
//! Retry bookkeeping travels in broker headers, never in the JSON body:
//!
//! | Header                   | Meaning                                   |
//! |--------------------------|-------------------------------------------|
//! | `x-retry-count`          | Hops made so far (absent means 0)         |
//! | `x-original-routing-key` | Routing key of the first delivery         |
//! | `x-retry-reason`         | Description of the most recent failure    |

use std::collections::BTreeMap;
use std::fmt;

pub const HEADER_RETRY_COUNT: &str = "x-retry-count";
pub const HEADER_ORIGINAL_ROUTING_KEY: &str = "x-original-routing-key";
pub const HEADER_RETRY_REASON: &str = "x-retry-reason";

/// A single header value.
///
/// Besides the scalars this service reads and writes, nested and binary
/// shapes are carried through unchanged so that headers added by the
/// broker (such as `x-death`) survive a republish.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Decimal { scale: u8, value: u32 },
    /// Seconds since the Unix epoch.
    Timestamp(u64),
    Bytes(Vec<u8>),
    Array(Vec<HeaderValue>),
    Table(Headers),
    Void,
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Float(v) => write!(f, "{v}"),
            HeaderValue::Bool(v) => write!(f, "{v}"),
            HeaderValue::Text(v) => f.write_str(v),
            HeaderValue::Decimal { scale, value } => write!(f, "{value}e-{scale}"),
            HeaderValue::Timestamp(v) => write!(f, "{v}"),
            HeaderValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            HeaderValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            HeaderValue::Table(table) => {
                f.write_str("{")?;
                for (i, (name, value)) in table.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            HeaderValue::Void => f.write_str("void"),
        }
    }
}

/// Mutable header bag attached to a message.
pub type Headers = BTreeMap<String, HeaderValue>;

/// An inbound unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub headers: Headers,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>, routing_key: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            routing_key: routing_key.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: HeaderValue) -> Self {
        self.headers.insert(name.into(), value);
        self
    }

    /// Retry bookkeeping carried by this message.
    pub fn retry_metadata(&self) -> RetryMetadata {
        RetryMetadata::from_headers(&self.headers)
    }
}

/// Retry bookkeeping read from, and written back to, message headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryMetadata {
    pub retry_count: u32,
    pub original_routing_key: Option<String>,
    pub retry_reason: Option<String>,
}

impl RetryMetadata {
    /// Read the retry headers. A missing, negative or non-numeric
    /// `x-retry-count` reads as 0; counts beyond `u32::MAX` saturate and
    /// fractional counts are truncated.
    pub fn from_headers(headers: &Headers) -> Self {
        let retry_count = headers
            .get(HEADER_RETRY_COUNT)
            .map_or(0, read_retry_count);

        let text = |name: &str| match headers.get(name) {
            Some(HeaderValue::Text(s)) => Some(s.clone()),
            _ => None,
        };

        Self {
            retry_count,
            original_routing_key: text(HEADER_ORIGINAL_ROUTING_KEY),
            retry_reason: text(HEADER_RETRY_REASON),
        }
    }

    /// Metadata for the next hop: count set to `retry_count`, the original
    /// routing key pinned on the first hop only, reason replaced.
    pub fn next_hop(&self, retry_count: u32, routing_key: &str, reason: &str) -> Self {
        Self {
            retry_count,
            original_routing_key: Some(
                self.original_routing_key
                    .clone()
                    .unwrap_or_else(|| routing_key.to_string()),
            ),
            retry_reason: Some(reason.to_string()),
        }
    }

    /// Write this metadata into `headers`, leaving unrelated headers alone.
    pub fn apply_to(&self, headers: &mut Headers) {
        headers.insert(
            HEADER_RETRY_COUNT.to_string(),
            HeaderValue::Int(i64::from(self.retry_count)),
        );
        if let Some(key) = &self.original_routing_key {
            headers.insert(
                HEADER_ORIGINAL_ROUTING_KEY.to_string(),
                HeaderValue::Text(key.clone()),
            );
        }
        if let Some(reason) = &self.retry_reason {
            headers.insert(
                HEADER_RETRY_REASON.to_string(),
                HeaderValue::Text(reason.clone()),
            );
        }
    }
}

fn read_retry_count(value: &HeaderValue) -> u32 {
    match value {
        HeaderValue::Int(n) if *n < 0 => 0,
        HeaderValue::Int(n) => u32::try_from(*n).unwrap_or(u32::MAX),
        // `as` saturates and maps NaN to 0.
        HeaderValue::Float(v) => v.trunc() as u32,
        HeaderValue::Text(s) => {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(n) => u32::try_from(n).unwrap_or(u32::MAX),
                Err(_) => s.parse::<f64>().map_or(0, |v| v.trunc() as u32),
            }
        }
        _ => 0,
    }
}
