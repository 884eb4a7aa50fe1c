/*!
 * Redis RESP Wire Protocol Reader
 *
 * Decodes the request framing clients send (an array of bulk strings) on top
 * of a line-oriented byte source, and encodes the handful of reply forms the
 * server produces. The reader never assumes a full frame is present: running
 * out of bytes surfaces as `ProtocolError::EndOfData` so the caller can wait
 * for more and retry from the start of the frame.
 */

use crate::error::{ProtocolError, ProtocolResult};

/// A byte source that can hand out delimiter-terminated chunks.
pub trait LineSource {
    /// Read up to and including `delim`.
    ///
    /// Fails with `EndOfData` when the delimiter is not found before the
    /// source is exhausted; in that case nothing counts as consumed.
    fn read_until(&mut self, delim: u8) -> ProtocolResult<&[u8]>;

    /// Like `read_until`, but only looks at the next `limit` bytes.
    ///
    /// Fails with `Overrun` when `limit` bytes are available and none of them
    /// is `delim`, and with `EndOfData` when fewer than `limit` bytes are
    /// available and none of them is `delim`.
    fn read_until_within(&mut self, delim: u8, limit: usize) -> ProtocolResult<&[u8]>;
}

/// Cursor over a borrowed byte window.
///
/// `position()` tells how many bytes the reads so far have consumed, which is
/// how the event loop knows how much of a connection buffer to discard.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl<'a> LineSource for ByteCursor<'a> {
    fn read_until(&mut self, delim: u8) -> ProtocolResult<&[u8]> {
        self.read_until_within(delim, usize::MAX)
    }

    fn read_until_within(&mut self, delim: u8, limit: usize) -> ProtocolResult<&[u8]> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        let window = &rest[..rest.len().min(limit)];
        match window.iter().position(|&b| b == delim) {
            Some(i) => {
                self.pos += i + 1;
                Ok(&rest[..=i])
            }
            None if window.len() == limit => Err(ProtocolError::Overrun { limit }),
            None => Err(ProtocolError::EndOfData),
        }
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `:<n>`
    Integer(i64),
    /// `*<n>`
    ArrayLen(i64),
    /// `$<n>`
    BulkLen(i64),
    /// `+<payload>`
    Simple(String),
}

impl Line {
    fn kind(&self) -> &'static str {
        match self {
            Line::Integer(_) => "integer",
            Line::ArrayLen(_) => "array length",
            Line::BulkLen(_) => "bulk string length",
            Line::Simple(_) => "simple string",
        }
    }
}

/// Parse a single protocol line (terminator already stripped).
///
/// Surrounding spaces are ignored. The first character selects the type;
/// anything other than `:`, `*`, `$` or `+` is rejected.
pub fn parse_line(s: &str) -> ProtocolResult<Line> {
    let s = s.trim_matches(' ');
    let mut chars = s.chars();
    let tag = chars.next().ok_or(ProtocolError::EmptyLine)?;
    let rest = chars.as_str();

    match tag {
        ':' => Ok(Line::Integer(parse_int(rest)?)),
        '*' => Ok(Line::ArrayLen(parse_int(rest)?)),
        '$' => Ok(Line::BulkLen(parse_int(rest)?)),
        '+' => Ok(Line::Simple(rest.to_owned())),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

fn parse_int(s: &str) -> ProtocolResult<i64> {
    s.parse::<i64>()
        .map_err(|_| ProtocolError::InvalidInteger(s.to_owned()))
}

/// Request decoder layered over a `LineSource`.
#[derive(Debug)]
pub struct RespReader<S> {
    src: S,
}

impl<S: LineSource> RespReader<S> {
    /// Wrap `src`. Reads start wherever `src` is currently positioned.
    pub fn new(src: S) -> Self {
        Self { src }
    }

    /// Borrow the underlying source, e.g. to ask a `ByteCursor` how far
    /// the reads so far have advanced.
    pub fn get_ref(&self) -> &S {
        &self.src
    }

    /// Consume the reader, returning the underlying source.
    pub fn into_inner(self) -> S {
        self.src
    }

    /// Read one `\r\n` terminated line and return it without the terminator.
    pub fn read_line(&mut self) -> ProtocolResult<String> {
        let raw = self.src.read_until(b'\n')?;
        line_body(raw)
    }

    /// Read a `*<n>` header. The caller decides whether `n` is acceptable.
    pub fn read_array_len(&mut self) -> ProtocolResult<i64> {
        let line = self.read_line()?;
        match parse_line(&line)? {
            Line::ArrayLen(n) => Ok(n),
            other => Err(ProtocolError::UnexpectedType {
                expected: "array length",
                found: other.kind(),
            }),
        }
    }

    /// Read a `$<len>` header followed by a payload line of exactly `len` bytes.
    ///
    /// The payload is only searched for its terminator within `len + 2`
    /// bytes, so a payload longer than declared is rejected as soon as those
    /// bytes have arrived instead of waiting for a newline.
    pub fn read_bulk_string(&mut self) -> ProtocolResult<String> {
        let line = self.read_line()?;
        let declared = match parse_line(&line)? {
            Line::BulkLen(n) => n,
            other => {
                return Err(ProtocolError::UnexpectedType {
                    expected: "bulk string length",
                    found: other.kind(),
                })
            }
        };
        if declared < 0 {
            return Err(ProtocolError::Syntax(format!(
                "negative bulk string length {declared}"
            )));
        }

        let limit = (declared as usize).saturating_add(2);
        let raw = match self.src.read_until_within(b'\n', limit) {
            Ok(raw) => raw,
            Err(ProtocolError::Overrun { .. }) => {
                return Err(ProtocolError::PayloadOverrun { declared })
            }
            Err(e) => return Err(e),
        };
        let payload = line_body(raw)?;
        if payload.len() as i64 != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }
        Ok(payload)
    }
}

/// Strip the `\r\n` terminator and decode the line as UTF-8.
fn line_body(raw: &[u8]) -> ProtocolResult<String> {
    let body = raw
        .strip_suffix(b"\r\n")
        .ok_or(ProtocolError::MissingCrlf)?;
    let s = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(s.to_owned())
}

//
// Reply encoders
//
// Replies are returned without the trailing CRLF; the event loop appends the
// terminator exactly once when it queues the reply for the socket.
//

/// `+<s>`
pub fn resp_simple(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 1);
    out.push('+');
    out.push_str(s);
    out
}

/// `$-1`, the null bulk string.
pub fn resp_null() -> String {
    "$-1".to_owned()
}

/// `-ERR <msg>`
pub fn resp_error(msg: &str) -> String {
    format!("-ERR {msg}")
}

/// Encode a client request as an array of bulk strings, CRLF included.
pub fn encode_request<T: AsRef<str>>(args: &[T]) -> String {
    let mut out = format!("*{}\r\n", args.len());
    for arg in args {
        let arg = arg.as_ref();
        out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
    }
    out
}
