//! Request, set, and command packet builders, and the response decoder.
//!
//! Every packet shares one header layout: three length bytes giving the
//! bitmask byte count per category, the bitmask bytes themselves, a
//! packets-to-follow byte, and a length byte. Builders append the CRC
//! trailer and stuff the result into a delimited frame; the decoder works
//! on an unstuffed payload whose CRC has already been checked and
//! stripped.

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, u8 as any_byte};
use nom::IResult;

use crate::error::{Error, Result};
use crate::protocol::options::{Category, Opt16, Opt8, OptVar, OptionTables};
use crate::protocol::{crc, framing, Command};

/// One variable-length value from a response: (option id, type byte,
/// payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarValue {
    pub id: u8,
    pub typ: u8,
    pub data: Vec<u8>,
}

/// A decoded response payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Continuation counter from the header.
    pub to_follow: u8,
    /// Header length byte, used by the set/upload paths.
    pub length: u8,
    /// Status byte, present only on command-shaped responses (all three
    /// header lengths zero).
    pub status: Option<u8>,
    /// 16-bit values in ascending-set-bit order, as (id, value).
    pub u16s: Vec<(u8, u16)>,
    /// 8-bit values in ascending-set-bit order, as (id, value).
    pub u8s: Vec<(u8, u8)>,
    /// Variable-length values in ascending-set-bit order.
    pub vars: Vec<VarValue>,
}

impl Decoded {
    /// Write every decoded value into the option tables, whether or not
    /// it was requested by this exchange. Ids the model does not know are
    /// skipped.
    pub fn apply(&self, tables: &mut OptionTables) {
        for &(id, value) in &self.u16s {
            if let Some(opt) = Opt16::from_id(id) {
                tables.set_u16(opt, value);
            }
        }
        for &(id, value) in &self.u8s {
            if let Some(opt) = Opt8::from_id(id) {
                tables.set_u8(opt, value);
            }
        }
        for var in &self.vars {
            if let Some(opt) = OptVar::from_id(var.id) {
                tables.set_var(opt, &var.data);
            }
        }
    }
}

/// Option ids encoded as a bitmask, bit *i* of byte *i/8* for id *i*.
fn bitmask_for(ids: &[u8]) -> Vec<u8> {
    let max = ids.iter().copied().max().unwrap_or(0);
    let mut mask = vec![0u8; max as usize / 8 + 1];
    for &id in ids {
        mask[id as usize / 8] |= 1 << (id % 8);
    }
    mask
}

/// Set bit positions of a bitmask, ascending.
fn ids_from_bitmask(mask: &[u8]) -> Vec<u8> {
    let mut ids = Vec::new();
    for (byte_index, &byte) in mask.iter().enumerate() {
        for bit in 0..8 {
            if byte & 1 << bit != 0 {
                ids.push((byte_index * 8 + bit) as u8);
            }
        }
    }
    ids
}

fn finish(mut payload: Vec<u8>) -> Vec<u8> {
    crc::append(&mut payload);
    framing::stuff(&payload)
}

/// Build a request frame for a set of option ids in one category.
///
/// The header carries exactly the requested bits, zero bytes for the
/// other two categories, and no continuation.
pub fn build_request(ids: &[u8], category: Category) -> Vec<u8> {
    debug_assert!(!ids.is_empty());
    let mask = bitmask_for(ids);
    let mut payload = vec![0u8; 3];
    payload[category as usize] = mask.len() as u8;
    payload.extend_from_slice(&mask);
    payload.push(0); // packets to follow
    payload.push(0); // length
    finish(payload)
}

/// Build the convenience frame requesting every known 16-bit and 8-bit
/// option plus board id and current state.
pub fn build_request_all() -> Vec<u8> {
    let mask16 = bitmask_for(&Opt16::ALL.map(Opt16::id));
    let mask8 = bitmask_for(&Opt8::ALL.map(Opt8::id));
    let maskv = bitmask_for(&[OptVar::BoardId.id(), OptVar::CurrentState.id()]);

    let mut payload = vec![mask16.len() as u8, mask8.len() as u8, maskv.len() as u8];
    payload.extend_from_slice(&mask16);
    payload.extend_from_slice(&mask8);
    payload.extend_from_slice(&maskv);
    payload.push(0);
    payload.push(0);
    finish(payload)
}

/// Build a set frame writing `values` to `ids`.
///
/// Values follow the bitmask section in ascending id order: two bytes
/// big-endian per 16-bit id, one byte otherwise. The header length byte
/// is 1 on a set.
pub fn build_set(ids: &[u8], category: Category, values: &[u16]) -> Result<Vec<u8>> {
    if ids.is_empty() || ids.len() != values.len() {
        return Err(Error::Validation(format!(
            "{} ids with {} values",
            ids.len(),
            values.len()
        )));
    }

    let mut pairs: Vec<(u8, u16)> = ids.iter().copied().zip(values.iter().copied()).collect();
    pairs.sort_by_key(|&(id, _)| id);
    if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(Error::Validation("duplicate option id".into()));
    }

    let mask = bitmask_for(ids);
    let mut payload = vec![0u8; 3];
    payload[category as usize] = mask.len() as u8;
    payload.extend_from_slice(&mask);
    payload.push(0);
    payload.push(1);

    for (_, value) in pairs {
        match category {
            Category::U16 => payload.extend_from_slice(&value.to_be_bytes()),
            Category::U8 | Category::Var => payload.push(value as u8),
        }
    }
    Ok(finish(payload))
}

/// Build a command frame: an all-empty header followed by the command
/// byte.
pub fn build_command(command: Command) -> Vec<u8> {
    finish(vec![0, 0, 0, command.code()])
}

/// Build a pattern-wave fetch frame, carrying the continuation count from
/// the previous response (0 on the first round).
pub fn build_wave_request(to_follow: u8) -> Vec<u8> {
    let mut payload = vec![0, 0, 1];
    payload.push(1 << OptVar::PatternWave.id());
    payload.push(to_follow);
    payload.push(0);
    finish(payload)
}

/// Build one pattern-wave upload chunk. The length byte carries the
/// chunk's *bit* count, not its byte count.
pub fn build_wave_chunk(first: bool, bit_count: u8, chunk: &[u8]) -> Vec<u8> {
    let selector = if first {
        OptVar::PatternWave
    } else {
        OptVar::PatternWaveAppend
    };
    let mut payload = vec![0, 0, 1];
    payload.push(1 << selector.id());
    payload.push(0);
    payload.push(bit_count);
    payload.extend_from_slice(chunk);
    finish(payload)
}

fn parse_response(input: &[u8]) -> IResult<&[u8], Decoded> {
    let (input, counts) = take(3usize)(input)?;
    let (n16, n8, nvar) = (counts[0] as usize, counts[1] as usize, counts[2] as usize);

    if n16 == 0 && n8 == 0 && nvar == 0 {
        // command-shaped response: the status byte sits where the
        // bitmask section would start
        let (input, status) = any_byte(input)?;
        return Ok((
            input,
            Decoded {
                status: Some(status),
                ..Decoded::default()
            },
        ));
    }

    let (input, mask16) = take(n16)(input)?;
    let (input, mask8) = take(n8)(input)?;
    let (input, maskv) = take(nvar)(input)?;
    let (input, to_follow) = any_byte(input)?;
    let (input, length) = any_byte(input)?;

    // the set-bit order of each mask fixes which ids are present and
    // their order in the value area
    let mut u16s = Vec::new();
    let mut input = input;
    for id in ids_from_bitmask(mask16) {
        let (rest, value) = be_u16(input)?;
        u16s.push((id, value));
        input = rest;
    }

    let mut u8s = Vec::new();
    for id in ids_from_bitmask(mask8) {
        let (rest, value) = any_byte(input)?;
        u8s.push((id, value));
        input = rest;
    }

    let mut vars = Vec::new();
    for id in ids_from_bitmask(maskv) {
        let (rest, typ) = any_byte(input)?;
        let (rest, len) = any_byte(rest)?;
        let (rest, data) = take(len as usize)(rest)?;
        vars.push(VarValue {
            id,
            typ,
            data: data.to_vec(),
        });
        input = rest;
    }

    Ok((
        input,
        Decoded {
            to_follow,
            length,
            status: None,
            u16s,
            u8s,
            vars,
        },
    ))
}

/// Decode a response payload (unstuffed, CRC already checked and
/// stripped).
///
/// The number of value slots consumed per category always equals the
/// number of set bits in that category's bitmask; a payload too short to
/// satisfy its own header is a protocol error.
pub fn decode_response(payload: &[u8]) -> Result<Decoded> {
    match parse_response(payload) {
        Ok((_, decoded)) => Ok(decoded),
        Err(_) => Err(Error::Protocol("malformed response payload".into())),
    }
}
