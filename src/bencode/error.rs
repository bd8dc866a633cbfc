use thiserror::Error;

/// Errors produced while decoding bencode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BencodeError {
    /// Input ended before the value was complete.
    #[error("input ended before the value was complete")]
    Truncated,

    /// Integer is empty, non-canonical, or out of the i64 range.
    #[error("malformed integer")]
    BadInteger,

    /// Byte-string length prefix is not a decimal number.
    #[error("malformed string length")]
    BadLength,

    /// Dictionary key is not a byte string.
    #[error("dictionary key is not a byte string")]
    BadKey,

    /// Bytes remain after the first complete value.
    #[error("trailing bytes after the value")]
    TrailingData,

    /// Nesting exceeds the depth limit.
    #[error("nesting depth limit exceeded")]
    TooDeep,

    /// Byte cannot start a bencode value.
    #[error("unexpected byte {0:#04x}")]
    Unexpected(u8),
}
