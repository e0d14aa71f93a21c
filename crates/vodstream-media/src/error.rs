//! Error types for vodstream-media.
//!
//! Every parse failure carries enough context (box FourCC, byte offset) to
//! render the one-line diagnostic the dispatcher logs before translating the
//! error to a host status code.

use std::io;
use thiserror::Error;

/// Result type for vodstream-media operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A box header or table claimed more bytes than were available.
    #[error("truncated box: need {need} bytes, have {have}")]
    TruncatedBox {
        fourcc: Option<[u8; 4]>,
        offset: Option<u64>,
        need: usize,
        have: usize,
    },

    /// A box was structurally invalid (bad size, bad entry count, short prelude).
    #[error("malformed box: {detail}")]
    MalformedBox {
        fourcc: Option<[u8; 4]>,
        offset: Option<u64>,
        detail: String,
    },

    /// Sample description referenced a codec this packetiser can't wrap.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Source is missing `moov` or `mdat`.
    #[error("missing required atom: {0}")]
    NoMovieOrMedia(&'static str),

    /// `video=` sample index doesn't address a real segment.
    #[error("segment not found for sample index {sample_index} (track has {sample_count} samples)")]
    SegmentNotFound { sample_index: u64, sample_count: u32 },

    /// Query string failed to parse.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The underlying file read failed.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

impl Error {
    pub fn truncated(fourcc: Option<[u8; 4]>, offset: Option<u64>, need: usize, have: usize) -> Self {
        Self::TruncatedBox { fourcc, offset, need, have }
    }

    pub fn malformed(fourcc: Option<[u8; 4]>, offset: Option<u64>, detail: impl Into<String>) -> Self {
        Self::MalformedBox { fourcc, offset, detail: detail.into() }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::UnsupportedCodec(detail.into())
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::BadRequest(detail.into())
    }

    /// Host status-code equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) | Error::SegmentNotFound { .. } => 404,
            Error::TruncatedBox { .. }
            | Error::MalformedBox { .. }
            | Error::UnsupportedCodec(_)
            | Error::NoMovieOrMedia(_) => 415,
            Error::IoFailure(_) => 500,
        }
    }

    /// One-line diagnostic including the offending box FourCC and byte offset
    /// when available, for the host's logging sink.
    pub fn diagnostic(&self) -> String {
        match self {
            Error::TruncatedBox { fourcc, offset, need, have } => format!(
                "{} box={} offset={} need={} have={}",
                self, fourcc_str(*fourcc), offset_str(*offset), need, have
            ),
            Error::MalformedBox { fourcc, offset, .. } => format!(
                "{} box={} offset={}",
                self, fourcc_str(*fourcc), offset_str(*offset)
            ),
            other => other.to_string(),
        }
    }
}

fn fourcc_str(fourcc: Option<[u8; 4]>) -> String {
    match fourcc {
        Some(f) => String::from_utf8_lossy(&f).into_owned(),
        None => "?".to_string(),
    }
}

fn offset_str(offset: Option<u64>) -> String {
    match offset {
        Some(o) => o.to_string(),
        None => "?".to_string(),
    }
}
