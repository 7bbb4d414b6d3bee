//! Stack-machine decoder for the pickle subset.
//!
//! The decoder executes opcodes from binary pickle protocols 1 through 5,
//! building [`Value`] graphs. It is deliberately not a general pickle
//! virtual machine: any opcode outside the subset (class instantiation,
//! reductions, persistent IDs, text-protocol opcodes) stops decoding with
//! [`Error::UnsupportedOpcode`]. Archive indexes only ever contain
//! dictionaries of strings mapped to lists of integer tuples, and the
//! opcode set reflects exactly that.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::opcode;
use crate::value::Value;

/// Highest protocol number the decoder will accept in a `PROTO` opcode.
const MAX_PROTOCOL: u8 = 5;

/// Decode a single pickled value from `data`.
///
/// Bytes after the `STOP` opcode are ignored. Fails with
/// [`Error::UnexpectedEof`] if the stream ends before `STOP`.
pub fn decode(data: &[u8]) -> Result<Value> {
    Decoder::new(data).run()
}

struct Decoder<'a> {
    input: Cursor<&'a [u8]>,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            input: Cursor::new(data),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let op = self.read_u8()?;
            match op {
                opcode::PROTO => {
                    let protocol = self.read_u8()?;
                    if protocol > MAX_PROTOCOL {
                        return Err(Error::UnsupportedProtocol(protocol));
                    }
                    trace!(protocol, "pickle protocol marker");
                }
                // Framing is advisory; payload boundaries are not enforced.
                opcode::FRAME => {
                    let _frame_len = self.read_u64()?;
                }
                opcode::STOP => {
                    let value = self.pop()?;
                    trace!(leftover = self.stack.len(), "pickle stream complete");
                    return Ok(value);
                }
                opcode::MARK => self.marks.push(self.stack.len()),
                opcode::NONE => self.stack.push(Value::None),

                opcode::BININT => {
                    let v = self.read_i32()?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                opcode::BININT1 => {
                    let v = self.read_u8()?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                opcode::BININT2 => {
                    let v = self.read_u16()?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                opcode::LONG1 => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Int(decode_long(&bytes)?));
                }
                opcode::LONG4 => {
                    let len = self.read_len_u32()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Int(decode_long(&bytes)?));
                }

                opcode::SHORT_BINSTRING => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(string_from_legacy(bytes)));
                }
                opcode::BINSTRING => {
                    let len = self.read_len_u32()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(string_from_legacy(bytes)));
                }
                opcode::BINUNICODE => {
                    let len = self.read_len_u32()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(String::from_utf8(bytes)?));
                }
                opcode::SHORT_BINUNICODE => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(String::from_utf8(bytes)?));
                }
                opcode::BINUNICODE8 => {
                    let len = self.read_len_u64()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(String::from_utf8(bytes)?));
                }

                opcode::BINBYTES => {
                    let len = self.read_len_u32()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Bytes(bytes));
                }
                opcode::SHORT_BINBYTES => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Bytes(bytes));
                }
                opcode::BINBYTES8 => {
                    let len = self.read_len_u64()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Bytes(bytes));
                }

                opcode::EMPTY_DICT => self.stack.push(Value::Dict(Vec::new())),
                opcode::DICT => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Dict(pair_up(items)?));
                }
                opcode::EMPTY_LIST => self.stack.push(Value::List(Vec::new())),
                opcode::LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                opcode::EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new())),
                opcode::TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                opcode::TUPLE1 => {
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a]));
                }
                opcode::TUPLE2 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b]));
                }
                opcode::TUPLE3 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b, c]));
                }

                opcode::APPEND => {
                    let item = self.pop()?;
                    self.top_list()?.push(item);
                }
                opcode::APPENDS => {
                    let items = self.pop_mark()?;
                    self.top_list()?.extend(items);
                }
                opcode::SETITEM => {
                    let v = self.pop()?;
                    let k = self.pop()?;
                    self.top_dict()?.push((k, v));
                }
                opcode::SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = pair_up(items)?;
                    self.top_dict()?.extend(pairs);
                }

                opcode::BINPUT => {
                    let slot = u32::from(self.read_u8()?);
                    self.memo_put(slot)?;
                }
                opcode::LONG_BINPUT => {
                    let slot = self.read_u32()?;
                    self.memo_put(slot)?;
                }
                opcode::MEMOIZE => {
                    let slot = u32::try_from(self.memo.len())
                        .map_err(|_| Error::Malformed("memo table overflow"))?;
                    self.memo_put(slot)?;
                }
                opcode::BINGET => {
                    let slot = u32::from(self.read_u8()?);
                    self.memo_get(slot)?;
                }
                opcode::LONG_BINGET => {
                    let slot = self.read_u32()?;
                    self.memo_get(slot)?;
                }

                other => return Err(Error::UnsupportedOpcode(other)),
            }
        }
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    /// Pop everything pushed since the most recent mark, in push order.
    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self.marks.pop().ok_or(Error::MissingMark)?;
        if mark > self.stack.len() {
            return Err(Error::StackUnderflow);
        }
        Ok(self.stack.split_off(mark))
    }

    fn top_list(&mut self) -> Result<&mut Vec<Value>> {
        match self.stack.last_mut() {
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(Error::TypeMismatch {
                expected: "list",
                found: other.value_type(),
            }),
            None => Err(Error::StackUnderflow),
        }
    }

    fn top_dict(&mut self) -> Result<&mut Vec<(Value, Value)>> {
        match self.stack.last_mut() {
            Some(Value::Dict(pairs)) => Ok(pairs),
            Some(other) => Err(Error::TypeMismatch {
                expected: "dict",
                found: other.value_type(),
            }),
            None => Err(Error::StackUnderflow),
        }
    }

    fn memo_put(&mut self, slot: u32) -> Result<()> {
        let top = self.stack.last().ok_or(Error::StackUnderflow)?.clone();
        self.memo.insert(slot, top);
        Ok(())
    }

    fn memo_get(&mut self, slot: u32) -> Result<()> {
        let value = self
            .memo
            .get(&slot)
            .ok_or(Error::MemoMissing(slot))?
            .clone();
        self.stack.push(value);
        Ok(())
    }

    fn remaining(&self) -> usize {
        let pos = self.input.position() as usize;
        self.input.get_ref().len().saturating_sub(pos)
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.input.read_u8().map_err(|_| Error::UnexpectedEof)
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.input
            .read_u16::<LittleEndian>()
            .map_err(|_| Error::UnexpectedEof)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.input
            .read_i32::<LittleEndian>()
            .map_err(|_| Error::UnexpectedEof)
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.input
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::UnexpectedEof)
    }

    fn read_u64(&mut self) -> Result<u64> {
        self.input
            .read_u64::<LittleEndian>()
            .map_err(|_| Error::UnexpectedEof)
    }

    fn read_len_u32(&mut self) -> Result<usize> {
        let len = self.read_u32()?;
        usize::try_from(len).map_err(|_| Error::UnexpectedEof)
    }

    fn read_len_u64(&mut self) -> Result<usize> {
        let len = self.read_u64()?;
        usize::try_from(len).map_err(|_| Error::UnexpectedEof)
    }

    /// Read exactly `len` bytes. The length is validated against the
    /// remaining input before allocating, so a corrupt length field cannot
    /// trigger an oversized allocation.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(Error::UnexpectedEof);
        }
        let mut buf = vec![0u8; len];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| Error::UnexpectedEof)?;
        Ok(buf)
    }
}

/// Group a flat `[k1, v1, k2, v2, ...]` run into pairs.
fn pair_up(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(Error::Malformed("odd number of dict operands"));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}

/// Two's-complement little-endian integer of up to 8 bytes, as written by
/// the `LONG1`/`LONG4` opcodes. An empty payload is zero.
fn decode_long(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(Error::IntegerOverflow);
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= i64::from(*b) << (8 * i);
    }
    let top = bytes[bytes.len() - 1];
    if bytes.len() < 8 && top & 0x80 != 0 {
        value |= -1i64 << (8 * bytes.len());
    }
    Ok(value)
}

/// Protocol ≤ 2 byte strings: almost always UTF-8 in practice, with a
/// latin-1 fallback for stray high bytes in very old archives.
fn string_from_legacy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => err.into_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}
