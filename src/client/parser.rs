//! Incremental frame parsers for streamed response bodies.
//!
//! Bytes arrive in arbitrary chunks; a parser buffers them and returns every complete item
//! as soon as it is available. Two framings are used by the runtime:
//!
//! | Parser | Framing | Item |
//! |--------|---------|------|
//! | [`LineParser`] | text ending in `\n`, `\r\n` or `\r`, decoded lossily as UTF-8 | `String` |
//! | [`JsonParser`] | back-to-back JSON values, no separator | any `DeserializeOwned` |
//!
//! At end of input [`FrameParser::finish`] flushes what is left: the final unterminated
//! line, or an error if a JSON value was cut off.
//!
//! # Examples
//!
//! ```
//! use dockhand::client::{FrameParser, LineParser};
//!
//! let mut parser = LineParser::new();
//! assert_eq!(parser.feed(b"first\r\nsec").unwrap(), vec!["first"]);
//! assert_eq!(parser.feed(b"ond\nlast").unwrap(), vec!["second"]);
//! assert_eq!(parser.finish().unwrap(), Some("last".to_string()));
//! ```

use crate::error::{EngineError, Result};
use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Incremental decoder from bytes to items.
pub trait FrameParser: Send {
    /// Decoded item.
    type Item;

    /// Buffer `data` and push every item it completes to `out`, in order.
    ///
    /// On malformed input, the items decoded before it are still in `out`.
    fn decode(&mut self, data: &[u8], out: &mut Vec<Self::Item>) -> Result<()>;

    /// Like [`decode`](Self::decode), collecting into a new vector.
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Self::Item>> {
        let mut out = Vec::new();
        self.decode(data, &mut out)?;
        Ok(out)
    }

    /// Flush at end of input.
    fn finish(&mut self) -> Result<Option<Self::Item>>;
}

/// Splits text into lines.
///
/// A line ends at `\n`, `\r\n` or a bare `\r`. Bytes that are not valid UTF-8 are replaced
/// with U+FFFD, since container output is arbitrary.
#[derive(Debug)]
pub struct LineParser {
    /// Bytes of the current, incomplete line
    buffer: BytesMut,
    /// Bytes already scanned for a terminator
    scanned: usize,
    /// Whether the start of the stream was checked for a BOM
    bom_checked: bool,
}

impl LineParser {
    /// Create a new line parser
    pub fn new() -> Self {
        LineParser {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            bom_checked: false,
        }
    }

    fn skip_bom(&mut self) {
        if self.bom_checked {
            return;
        }
        if self.buffer.starts_with(BOM) {
            self.buffer.advance(BOM.len());
            self.bom_checked = true;
        } else if self.buffer.len() >= BOM.len() || !BOM.starts_with(&self.buffer) {
            self.bom_checked = true;
        }
    }

    /// Length of the next complete line and the bytes it occupies with its terminator.
    ///
    /// A `\r` as the last buffered byte is not a terminator yet: a `\n` may follow.
    fn next_line(&self) -> Option<(usize, usize)> {
        let pos = self.buffer[self.scanned..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')?
            + self.scanned;
        match (self.buffer[pos], self.buffer.get(pos + 1).copied()) {
            (b'\n', _) => Some((pos, pos + 1)),
            (_, Some(b'\n')) => Some((pos, pos + 2)),
            (_, Some(_)) => Some((pos, pos + 1)),
            (_, None) => None,
        }
    }

    fn take_line(&mut self, len: usize, consumed: usize) -> String {
        let line = self.buffer.split_to(consumed);
        String::from_utf8_lossy(&line[..len]).into_owned()
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser for LineParser {
    type Item = String;

    fn decode(&mut self, data: &[u8], out: &mut Vec<String>) -> Result<()> {
        self.buffer.extend_from_slice(data);
        self.skip_bom();
        if !self.bom_checked {
            return Ok(());
        }

        let before = out.len();
        while let Some((len, consumed)) = self.next_line() {
            self.scanned = 0;
            out.push(self.take_line(len, consumed));
        }
        // a trailing `\r` is rescanned once the next byte arrives
        self.scanned = self.buffer.len() - usize::from(self.buffer.last() == Some(&b'\r'));

        tracing::trace!("decoded {} lines from {} bytes", out.len() - before, data.len());
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<String>> {
        self.bom_checked = true;
        self.scanned = 0;
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let consumed = self.buffer.len();
        let len = consumed - usize::from(self.buffer.last() == Some(&b'\r'));
        Ok(Some(self.take_line(len, consumed)))
    }
}

/// Position of the next top-level JSON value boundary, tracked across chunks.
#[derive(Debug, Default)]
struct Boundary {
    /// Bytes of the buffer already scanned
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Inside a top-level number or literal
    in_scalar: bool,
}

impl Boundary {
    /// Scan `buf` from where the last call stopped; returns the end of the first complete
    /// top-level value.
    fn scan(&mut self, buf: &[u8]) -> Option<usize> {
        for (i, &b) in buf.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                continue;
            }

            let structural = matches!(b, b'{' | b'[' | b'}' | b']' | b'"' | b',');
            if self.in_scalar {
                // scalars are only delimited by what follows them
                if structural || b.is_ascii_whitespace() {
                    return Some(i);
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    // unbalanced closers are left for the deserializer to reject
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                b if b.is_ascii_whitespace() => {}
                _ if self.depth == 0 => self.in_scalar = true,
                _ => {}
            }
        }
        self.scanned = buf.len();
        None
    }

    fn reset(&mut self) {
        *self = Boundary::default();
    }
}

/// Decodes a sequence of concatenated JSON values.
///
/// Each buffered byte is scanned once for the end of the current top-level value, so a
/// large value arriving in many chunks is only deserialized when complete. The buffer
/// holds at most one incomplete value.
pub struct JsonParser<T> {
    /// Bytes not yet decoded
    buffer: BytesMut,
    boundary: Boundary,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonParser<T> {
    /// Create a new JSON parser
    pub fn new() -> Self {
        JsonParser {
            buffer: BytesMut::with_capacity(8192),
            boundary: Boundary::default(),
            _item: PhantomData,
        }
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonParser<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonParser")
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl<T: DeserializeOwned> JsonParser<T> {
    /// Deserialize the first `end` buffered bytes and drop them from the buffer.
    fn take_value(&mut self, end: usize) -> Result<T> {
        let raw = self.buffer.split_to(end);
        self.boundary.reset();
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl<T: DeserializeOwned> FrameParser for JsonParser<T> {
    type Item = T;

    fn decode(&mut self, data: &[u8], out: &mut Vec<T>) -> Result<()> {
        self.buffer.extend_from_slice(data);
        let before = out.len();

        while let Some(end) = self.boundary.scan(&self.buffer) {
            let value = self.take_value(end)?;
            out.push(value);
        }

        tracing::trace!("decoded {} JSON values from {} bytes", out.len() - before, data.len());
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<T>> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            self.boundary.reset();
            return Ok(None);
        }
        // a trailing number or literal ends with the input
        if self.boundary.in_scalar {
            let end = self.buffer.len();
            return self.take_value(end).map(Some);
        }

        let remaining = self.buffer.len();
        self.buffer.clear();
        self.boundary.reset();
        Err(EngineError::Decode(format!(
            "stream ended inside a JSON value ({remaining} bytes left)"
        )))
    }
}
