use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 32;

/// Decodes exactly one bencode value from `input`.
///
/// # Errors
///
/// Fails on truncated input, non-canonical integers (`i-0e`, leading
/// zeros), nesting deeper than 32 levels, non-string dictionary keys, and
/// bytes remaining after the value.
///
/// # Examples
///
/// ```
/// use mldht::bencode::decode;
///
/// let value = decode(b"l4:pingi2ee").unwrap();
/// let items = value.as_list().unwrap();
/// assert_eq!(items[0].as_str(), Some("ping"));
/// assert_eq!(items[1].as_int(), Some(2));
/// ```
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let mut cursor = Cursor { input, pos: 0 };
    let value = cursor.value(0)?;
    if cursor.pos != input.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::Truncated)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth >= MAX_DEPTH {
            return Err(BencodeError::TooDeep);
        }
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => Ok(Value::Str(self.byte_string()?)),
            other => Err(BencodeError::Unexpected(other)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let end = self.seek(b'e')?;
        let digits = &self.input[self.pos..end];
        let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);
        if magnitude.is_empty() {
            return Err(BencodeError::BadInteger);
        }
        // Canonical form only: no leading zeros, no negative zero.
        if magnitude[0] == b'0' && (magnitude.len() > 1 || magnitude.len() < digits.len()) {
            return Err(BencodeError::BadInteger);
        }
        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::BadInteger)?;
        let n = text.parse::<i64>().map_err(|_| BencodeError::BadInteger)?;
        self.pos = end + 1;
        Ok(Value::Int(n))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let end = self.seek(b':')?;
        let text = std::str::from_utf8(&self.input[self.pos..end])
            .map_err(|_| BencodeError::BadLength)?;
        let len = text.parse::<usize>().map_err(|_| BencodeError::BadLength)?;
        self.pos = end + 1;
        if self.input.len() - self.pos < len {
            return Err(BencodeError::Truncated);
        }
        let bytes = Bytes::copy_from_slice(&self.input[self.pos..self.pos + len]);
        self.pos += len;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::BadKey);
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }

    fn seek(&self, needle: u8) -> Result<usize, BencodeError> {
        self.input[self.pos..]
            .iter()
            .position(|&b| b == needle)
            .map(|offset| self.pos + offset)
            .ok_or(BencodeError::Truncated)
    }
}
