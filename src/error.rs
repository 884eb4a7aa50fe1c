/*!
 * Protocol Error Types
 *
 * Every way a request frame or a command can fail to decode. Syscall
 * failures stay as `std::io::Error` and are classified in `sys`.
 */

use thiserror::Error;

/// Result alias for wire protocol and command decoding.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Failure while decoding a request off a connection's byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No `\n` delimiter before the source ran out of bytes.
    #[error("end of data")]
    EndOfData,
    /// A line ended in `\n` without the preceding `\r`.
    #[error("expected CRLF line terminator")]
    MissingCrlf,
    #[error("empty protocol line")]
    EmptyLine,
    #[error("unknown type tag '{0}'")]
    UnknownType(char),
    #[error("cannot parse '{0}' as integer")]
    InvalidInteger(String),
    #[error("expected {expected}, got {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("mismatched line length {actual}, declared {declared}")]
    LengthMismatch { declared: i64, actual: usize },
    /// Payload not terminated within its declared length.
    #[error("mismatched line length, payload longer than declared {declared}")]
    PayloadOverrun { declared: i64 },
    /// No delimiter within the bytes a length-bounded read may inspect.
    #[error("no line terminator within {limit} bytes")]
    Overrun { limit: usize },
    #[error("array length should be at least 1")]
    EmptyArray,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("invalid expire time in 'set' command")]
    InvalidExpire,
    #[error("invalid UTF-8 in request")]
    InvalidUtf8,
}

impl ProtocolError {
    /// True when the frame may still complete once more bytes arrive.
    ///
    /// Every other variant means the stream cannot be trusted any more and
    /// the connection has to be dropped.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::EndOfData)
    }
}
