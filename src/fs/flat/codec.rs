//! Path encoding for flat namespaces with a restricted name alphabet.
//!
//! The flat stores this backend targets only accept names built from
//! `a-z`, `0-9` and `_`, capped at roughly 100 characters. Full paths are
//! therefore encoded into that alphabet with an adapted percent
//! encoding: every byte outside `a-z`/`0-9` is written as two hex digits
//! behind an escape marker, and since `%` itself is not a legal store
//! character the marker is the `_` sentinel (which is why a literal `_`
//! must itself be escaped). Tokens are lower-case throughout — the
//! encoding is case-insensitive but case-preserving in effect, because
//! paths are lower-cased before encoding and the emulated filesystem is
//! case-insensitive. Working case-insensitively roughly halves the
//! escape overhead and stretches the usable path length.
//!
//! The scheme is byte-local: each input byte maps to a fixed output
//! fragment independent of its neighbors. Two consequences the flat
//! backend relies on:
//!
//! - `encode` is prefix-preserving: `encode(p + q) == encode(p) +
//!   encode(q)`, so listing a directory is a prefix scan over encoded
//!   names.
//! - token length is `bytes(p) + 2 × escaped_bytes(p)`, deterministic in
//!   the input.

/// Longest name the targeted stores accept. Exceeding it is diagnosed by
/// the backend, not here; the store's own rejection is the real failure.
pub const MAX_TOKEN_LEN: usize = 100;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Encodes a path into the restricted store alphabet.
///
/// Total over all of Unicode; the input is lower-cased first, so
/// `decode(encode(p)) == lowercase(p)`.
#[must_use]
pub fn encode(path: &str) -> String {
    let lower = path.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    for byte in lower.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' => out.push(char::from(byte)),
            _ => {
                out.push('_');
                out.push(char::from(HEX[usize::from(byte >> 4)]));
                out.push(char::from(HEX[usize::from(byte & 0x0f)]));
            }
        }
    }
    out
}

/// Decodes a token produced by [`encode`].
///
/// Returns `None` for strings that are not in the encoding's image
/// (truncated escapes, bad hex, invalid UTF-8 after unescaping).
#[must_use]
pub fn decode(token: &str) -> Option<String> {
    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hi = char::from(*bytes.get(i + 1)?).to_digit(16)?;
            let lo = char::from(*bytes.get(i + 2)?).to_digit(16)?;
            out.push(u8::try_from(hi << 4 | lo).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
