//! Page tokens.
//!
//! A token is the whole read cursor; the server keeps no session state.
//! It names the segment being read (`kind` + `timestamp`) and the frame
//! offset to resume at, plus a pre-computed `next_*` hint for where the
//! stream continues once that segment is exhausted.
//!
//! | kind   | next   | meaning                                   |
//! |--------|--------|-------------------------------------------|
//! | none   | none   | start of stream                           |
//! | none   | some   | between segments; promote `next_*`        |
//! | some   | any    | inside a segment at `file_position`       |
//!
//! A `Live` hint names the dealer watermark: the stream continues at the
//! first RAW segment at or after it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use doclog_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which tier of a tenant's log a token points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// An OPTIMIZED segment
    Optimized,
    /// A SORTED segment
    Sorted,
    /// A RAW segment (undealt or recently dealt tail)
    Live,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Optimized => write!(f, "optimized"),
            TokenKind::Sorted => write!(f, "sorted"),
            TokenKind::Live => write!(f, "live"),
        }
    }
}

/// Resumable read position in a tenant's stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    /// Segment tier being read, if positioned inside a segment
    pub kind: Option<TokenKind>,
    /// Timestamp of the segment being read
    pub timestamp: u64,
    /// Frame offset to resume at; 0 means the first record
    pub file_position: u64,
    /// Where to continue once the current segment is exhausted
    pub next_kind: Option<TokenKind>,
    /// Timestamp for `next_kind`
    pub next_timestamp: u64,
}

impl PageToken {
    /// Token for the start of a tenant's stream
    pub fn initial() -> Self {
        PageToken::default()
    }

    /// Whether this is a start-of-stream token
    pub fn is_initial(&self) -> bool {
        self.kind.is_none() && self.next_kind.is_none()
    }

    /// Positioned at the start of a segment with an optional hint.
    pub(crate) fn at(kind: TokenKind, timestamp: u64, next: Option<(TokenKind, u64)>) -> Self {
        let (next_kind, next_timestamp) = split(next);
        PageToken {
            kind: Some(kind),
            timestamp,
            file_position: 0,
            next_kind,
            next_timestamp,
        }
    }

    /// Between segments, continuing at `next`.
    pub(crate) fn between(next: (TokenKind, u64)) -> Self {
        PageToken {
            next_kind: Some(next.0),
            next_timestamp: next.1,
            ..PageToken::default()
        }
    }

    /// The `next_*` hint as a pair
    pub fn next(&self) -> Option<(TokenKind, u64)> {
        self.next_kind.map(|kind| (kind, self.next_timestamp))
    }

    /// Encode as an opaque URL-safe string.
    pub fn encode(&self) -> Result<String> {
        let bytes = rmp_serde::to_vec(self).map_err(|e| Error::serialization(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a string produced by [`PageToken::encode`].
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| Error::invalid_token(format!("bad encoding: {}", e)))?;
        rmp_serde::from_slice(&bytes).map_err(|e| Error::invalid_token(format!("bad payload: {}", e)))
    }
}

fn split(next: Option<(TokenKind, u64)>) -> (Option<TokenKind>, u64) {
    match next {
        Some((kind, ts)) => (Some(kind), ts),
        None => (None, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial() {
        let token = PageToken::initial();
        assert!(token.is_initial());
        assert!(!PageToken::between((TokenKind::Live, 5)).is_initial());
        assert!(!PageToken::at(TokenKind::Sorted, 5, None).is_initial());
    }

    #[test]
    fn test_encode_is_url_safe() {
        let token = PageToken {
            kind: Some(TokenKind::Optimized),
            timestamp: u64::MAX,
            file_position: 1 << 40,
            next_kind: Some(TokenKind::Live),
            next_timestamp: 1_700_000_000_000,
        };
        let encoded = token.encode().unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(PageToken::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(PageToken::decode("!!!"), Err(Error::InvalidToken(_))));
        let not_a_token = URL_SAFE_NO_PAD.encode(b"\xc1\xc1");
        assert!(matches!(
            PageToken::decode(&not_a_token),
            Err(Error::InvalidToken(_))
        ));
    }
}
