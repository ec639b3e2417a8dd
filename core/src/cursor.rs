//! Opaque paging cursors.
//!
//! Storage backends return raw continuation bytes with each page. Callers
//! only ever see those bytes wrapped in a base64 [`PageCursor`]; they carry no
//! meaning outside the backend that produced them.
//!
//! # Contract
//!
//! - `decode(encode(b)) == b` for every non-empty `b`
//! - `encode(&[])` is `None` ("no more pages"), never an empty string
//! - `decode` of an absent, empty or malformed cursor is `None`
//!
//! Decoding is lenient: a corrupted cursor reads as "start from the first
//! page" instead of failing the whole list call.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base64 wrapper around storage continuation bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// The encoded cursor text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the cursor, returning the encoded text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wrap continuation bytes in a cursor.
///
/// Returns `None` for empty input.
#[must_use]
pub fn encode(continuation: &[u8]) -> Option<PageCursor> {
    if continuation.is_empty() {
        return None;
    }
    Some(PageCursor(STANDARD.encode(continuation)))
}

/// Unwrap a cursor back into continuation bytes.
///
/// Returns `None` when the cursor is absent, empty, or not valid base64.
#[must_use]
pub fn decode(cursor: Option<&str>) -> Option<Vec<u8>> {
    let text = cursor.filter(|c| !c.is_empty())?;
    STANDARD.decode(text).ok().filter(|bytes| !bytes.is_empty())
}

/// Continuation bytes for a keyset scan that resumes after `last_id`.
///
/// Both storage backends page products by ascending id and use this layout:
/// the big-endian id of the last row returned.
#[must_use]
pub fn continuation_after(last_id: u64) -> Vec<u8> {
    last_id.to_be_bytes().to_vec()
}

/// Read the resume point out of keyset continuation bytes.
///
/// Returns `None` if the bytes were not produced by [`continuation_after`].
#[must_use]
pub fn resume_after(continuation: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = continuation.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
