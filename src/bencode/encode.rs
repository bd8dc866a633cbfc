use bytes::{BufMut, Bytes, BytesMut};

use super::value::Value;

/// Encodes a value into its bencode byte form.
///
/// Encoding cannot fail; dictionaries already hold their keys sorted.
pub fn encode(value: &Value) -> Bytes {
    let mut buf = BytesMut::new();
    write_value(value, &mut buf);
    buf.freeze()
}

fn write_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Int(n) => {
            buf.put_u8(b'i');
            buf.put_slice(n.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Str(bytes) => write_string(bytes, buf),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                write_value(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(entries) => {
            buf.put_u8(b'd');
            for (key, item) in entries {
                write_string(key, buf);
                write_value(item, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn write_string(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}
