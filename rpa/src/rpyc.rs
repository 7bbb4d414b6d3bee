//! Compiled script containers (`RENPY RPC2`)
//!
//! A compiled script starts with a ten-byte magic followed by a table of
//! `(slot, start, length)` u32 triples, terminated by a zero slot. Slot 1
//! holds the zlib-compressed source pickle.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use tracing::trace;

use crate::error::{Error, Result};

/// Magic bytes opening a compiled script container
pub const RPC2_MAGIC: &[u8] = b"RENPY RPC2";

/// Parse the slot table of a compiled script and slice out each slot's
/// payload. Offsets are absolute within `data`.
pub fn parse_slots(data: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>> {
    let rest = data
        .strip_prefix(RPC2_MAGIC)
        .ok_or_else(|| Error::InvalidScript("missing RENPY RPC2 magic".into()))?;

    let mut cursor = Cursor::new(rest);
    let mut slots = BTreeMap::new();
    loop {
        let (slot, start, length) = read_slot_triple(&mut cursor)?;
        if slot == 0 {
            break;
        }

        let start = start as usize;
        let end = start
            .checked_add(length as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::InvalidScript(format!(
                    "slot {slot} spans {start:#x}+{length}, past {} bytes",
                    data.len()
                ))
            })?;

        trace!("Script slot {slot}: {length} bytes at {start:#x}");
        slots.insert(slot, data[start..end].to_vec());
    }

    Ok(slots)
}

fn read_slot_triple(cursor: &mut Cursor<&[u8]>) -> Result<(u32, u32, u32)> {
    let mut triple = [0u32; 3];
    for value in &mut triple {
        *value = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::InvalidScript("truncated slot table".into()))?;
    }
    Ok((triple[0], triple[1], triple[2]))
}

/// Decompress the source pickle held in slot 1.
///
/// Returns the raw pickle bytes; decoding them is out of scope since
/// script pickles reference arbitrary engine classes.
pub fn source_pickle(data: &[u8]) -> Result<Vec<u8>> {
    let slots = parse_slots(data)?;
    let compressed = slots
        .get(&1)
        .ok_or_else(|| Error::InvalidScript("no source slot".into()))?;

    let mut pickled = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut pickled)
        .map_err(|e| Error::InvalidScript(format!("slot 1 zlib: {e}")))?;

    if pickled.last() != Some(&b'.') {
        return Err(Error::InvalidScript(
            "slot 1 does not end with a pickle stop".into(),
        ));
    }
    Ok(pickled)
}
