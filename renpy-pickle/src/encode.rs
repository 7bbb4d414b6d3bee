//! Protocol-2 pickle writer for the supported value shapes.
//!
//! Output is deterministic: the same [`Value`] graph always serializes to
//! the same bytes. No memo records are written; index graphs are trees,
//! and every reference unpickler accepts memo-free streams.

use crate::error::{Error, Result};
use crate::opcode;
use crate::value::Value;

/// Serialize `value` as a protocol-2 pickle stream.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(opcode::PROTO);
    out.push(2);
    write_value(&mut out, value)?;
    out.push(opcode::STOP);
    Ok(out)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::None => out.push(opcode::NONE),
        Value::Int(v) => write_int(out, *v),
        Value::Str(s) => write_str(out, s)?,
        Value::Bytes(b) => write_bytes(out, b)?,
        Value::List(items) => {
            out.push(opcode::EMPTY_LIST);
            match items.len() {
                0 => {}
                1 => {
                    write_value(out, &items[0])?;
                    out.push(opcode::APPEND);
                }
                _ => {
                    out.push(opcode::MARK);
                    for item in items {
                        write_value(out, item)?;
                    }
                    out.push(opcode::APPENDS);
                }
            }
        }
        Value::Tuple(items) => match items.len() {
            0 => out.push(opcode::EMPTY_TUPLE),
            n @ 1..=3 => {
                for item in items {
                    write_value(out, item)?;
                }
                let op = match n {
                    1 => opcode::TUPLE1,
                    2 => opcode::TUPLE2,
                    _ => opcode::TUPLE3,
                };
                out.push(op);
            }
            _ => {
                out.push(opcode::MARK);
                for item in items {
                    write_value(out, item)?;
                }
                out.push(opcode::TUPLE);
            }
        },
        Value::Dict(pairs) => {
            out.push(opcode::EMPTY_DICT);
            match pairs.len() {
                0 => {}
                1 => {
                    write_value(out, &pairs[0].0)?;
                    write_value(out, &pairs[0].1)?;
                    out.push(opcode::SETITEM);
                }
                _ => {
                    out.push(opcode::MARK);
                    for (k, v) in pairs {
                        write_value(out, k)?;
                        write_value(out, v)?;
                    }
                    out.push(opcode::SETITEMS);
                }
            }
        }
    }
    Ok(())
}

fn write_int(out: &mut Vec<u8>, v: i64) {
    if (0..=0xff).contains(&v) {
        out.push(opcode::BININT1);
        out.push(v as u8);
    } else if (0..=0xffff).contains(&v) {
        out.push(opcode::BININT2);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if let Ok(v32) = i32::try_from(v) {
        out.push(opcode::BININT);
        out.extend_from_slice(&v32.to_le_bytes());
    } else {
        let payload = encode_long(v);
        out.push(opcode::LONG1);
        out.push(payload.len() as u8);
        out.extend_from_slice(&payload);
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u32::try_from(s.len()).map_err(|_| Error::TooLarge("string"))?;
    out.push(opcode::BINUNICODE);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_bytes(out: &mut Vec<u8>, b: &[u8]) -> Result<()> {
    if let Ok(len) = u8::try_from(b.len()) {
        out.push(opcode::SHORT_BINBYTES);
        out.push(len);
    } else {
        let len = u32::try_from(b.len()).map_err(|_| Error::TooLarge("byte string"))?;
        out.push(opcode::BINBYTES);
        out.extend_from_slice(&len.to_le_bytes());
    }
    out.extend_from_slice(b);
    Ok(())
}

/// Minimal two's-complement little-endian payload for `LONG1`, matching
/// CPython's `encode_long`. Only called for values outside the `BININT`
/// range, so the result is never empty and never longer than 8 bytes.
fn encode_long(v: i64) -> Vec<u8> {
    let mut bytes = v.to_le_bytes().to_vec();
    if v >= 0 {
        while bytes.len() > 1 && bytes[bytes.len() - 1] == 0 && bytes[bytes.len() - 2] & 0x80 == 0 {
            bytes.pop();
        }
    } else {
        while bytes.len() > 1 && bytes[bytes.len() - 1] == 0xff && bytes[bytes.len() - 2] & 0x80 != 0
        {
            bytes.pop();
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_index_dict_exact_bytes() {
        let value = Value::Dict(vec![(
            Value::from("foo.txt"),
            Value::List(vec![Value::Tuple(vec![
                Value::Int(34),
                Value::Int(5),
                Value::from(""),
            ])]),
        )]);
        let expected: &[u8] =
            b"\x80\x02}X\x07\x00\x00\x00foo.txt]K\"K\x05X\x00\x00\x00\x00\x87as.";
        assert_eq!(encode(&value).unwrap(), expected);
    }

    #[test]
    fn test_encode_int_opcode_selection() {
        assert_eq!(encode(&Value::Int(0)).unwrap(), b"\x80\x02K\x00.");
        assert_eq!(encode(&Value::Int(255)).unwrap(), b"\x80\x02K\xff.");
        assert_eq!(encode(&Value::Int(1000)).unwrap(), b"\x80\x02M\xe8\x03.");
        assert_eq!(
            encode(&Value::Int(-5)).unwrap(),
            b"\x80\x02J\xfb\xff\xff\xff."
        );
        assert_eq!(
            encode(&Value::Int(0xDEAD_BEEF)).unwrap(),
            b"\x80\x02\x8a\x05\xef\xbe\xad\xde\x00."
        );
        assert_eq!(
            encode(&Value::Int(0x1_0000_0000)).unwrap(),
            b"\x80\x02\x8a\x05\x00\x00\x00\x00\x01."
        );
    }

    #[test]
    fn test_encode_long_payloads() {
        assert_eq!(encode_long(-1), vec![0xff]);
        assert_eq!(encode_long(255), vec![0xff, 0x00]);
        assert_eq!(encode_long(-256), vec![0x00, 0xff]);
        assert_eq!(encode_long(i64::MAX), i64::MAX.to_le_bytes().to_vec());
        assert_eq!(encode_long(i64::MIN), i64::MIN.to_le_bytes().to_vec());
    }

    #[test]
    fn test_encode_container_batching() {
        assert_eq!(encode(&Value::List(vec![])).unwrap(), b"\x80\x02].");
        assert_eq!(
            encode(&Value::List(vec![Value::Int(1)])).unwrap(),
            b"\x80\x02]K\x01a."
        );
        assert_eq!(
            encode(&Value::List(vec![Value::Int(1), Value::Int(2)])).unwrap(),
            b"\x80\x02](K\x01K\x02e."
        );
        assert_eq!(encode(&Value::Tuple(vec![])).unwrap(), b"\x80\x02).");
        assert_eq!(
            encode(&Value::Dict(vec![
                (Value::from("a"), Value::Int(1)),
                (Value::from("b"), Value::Int(2)),
            ]))
            .unwrap(),
            b"\x80\x02}(X\x01\x00\x00\x00aK\x01X\x01\x00\x00\x00bK\x02u."
        );
    }

    #[test]
    fn test_encode_wide_tuple() {
        let value = Value::Tuple(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(4),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            b"\x80\x02(K\x01K\x02K\x03K\x04t."
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let value = Value::Dict(vec![
            (
                Value::from("images/bg forest.png"),
                Value::List(vec![Value::Tuple(vec![
                    Value::Int(0x1234_5678_9a),
                    Value::Int(0x22),
                    Value::from(""),
                ])]),
            ),
            (
                Value::from("scripts/day1.rpyc"),
                Value::List(vec![
                    Value::Tuple(vec![Value::Int(34), Value::Int(5)]),
                    Value::Tuple(vec![Value::Int(-9), Value::Int(0)]),
                ]),
            ),
            (Value::from("empty"), Value::None),
            (Value::from("blob"), Value::Bytes(vec![0, 1, 0xfe])),
        ]);
        let encoded = encode(&value).unwrap();
        assert_eq!(decode(&encoded).unwrap(), value);
    }
}
