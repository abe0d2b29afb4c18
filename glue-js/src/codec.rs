//! UTF-8 transfer between host strings and guest memory, plus the out-parameter slots used to
//! return multi-word results.

use crate::error::{BridgeError, Limit, Violation};
use crate::memory::GuestMemory;
use crate::value::JsString;

/// Where an encoded string landed in guest memory.
///
/// `capacity` is the size of the allocation, which can exceed `len` after the non-ASCII path
/// over-reserves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Encoded {
  pub ptr: u32,
  pub len: u32,
  pub capacity: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncodeMode {
  /// Copy ASCII straight in, then grow the allocation once for the remainder.
  #[default]
  Growable,
  /// Encode fully on the host side and allocate the exact size.
  Fixed,
}

/// Decodes `len` bytes at `ptr` as strict UTF-8. A leading byte-order mark is kept.
pub fn decode(
  memory: &mut GuestMemory,
  ptr: u32,
  len: u32,
  max_bytes: usize,
) -> Result<JsString, BridgeError> {
  if len as usize > max_bytes {
    return Err(BridgeError::limit_exceeded(
      Limit::MaxStringBytes,
      len as usize,
      max_bytes,
    ));
  }
  let decoded = memory.bytes().with_slice(ptr as usize, len as usize, |bytes| {
    std::str::from_utf8(bytes)
      .map(JsString::from)
      .map_err(|err| err.valid_up_to())
  })?;
  decoded.map_err(|valid_up_to| {
    tracing::debug!(target: "glue_js::codec", ptr, len, valid_up_to, "invalid utf-8");
    BridgeError::InvalidUtf8 {
      ptr,
      len,
      valid_up_to,
    }
  })
}

/// Encodes `text` into a fresh guest allocation. Lone surrogates become U+FFFD.
///
/// `max_bytes` bounds the encoded UTF-8 length and is checked before anything is allocated.
pub fn encode_into(
  memory: &mut GuestMemory,
  text: &JsString,
  mode: EncodeMode,
  max_bytes: usize,
) -> Result<Encoded, BridgeError> {
  let units = text.code_units();
  let encoded_len = utf8_len(units);
  if encoded_len > max_bytes {
    return Err(BridgeError::limit_exceeded(
      Limit::MaxStringBytes,
      encoded_len,
      max_bytes,
    ));
  }
  match mode {
    EncodeMode::Growable => encode_growable(memory, units),
    EncodeMode::Fixed => encode_fixed(memory, units),
  }
}

fn encode_fixed(memory: &mut GuestMemory, units: &[u16]) -> Result<Encoded, BridgeError> {
  let encoded = to_utf8_lossy(units);
  let len = encoded.len() as u32;
  let ptr = memory.malloc(len, 1)?;
  memory.write(ptr, encoded.as_bytes())?;
  tracing::trace!(target: "glue_js::codec", ptr, len, "encoded");
  Ok(Encoded {
    ptr,
    len,
    capacity: len,
  })
}

fn encode_growable(memory: &mut GuestMemory, units: &[u16]) -> Result<Encoded, BridgeError> {
  let mut capacity = units.len() as u32;
  let mut ptr = memory.malloc(capacity, 1)?;
  let ascii = memory
    .bytes()
    .with_slice_mut(ptr as usize, capacity as usize, |out| {
      let mut copied = 0;
      for (dst, &unit) in out.iter_mut().zip(units) {
        if unit > 0x7F {
          break;
        }
        *dst = unit as u8;
        copied += 1;
      }
      copied
    })?;

  let mut len = ascii;
  if ascii != units.len() {
    let rest = &units[ascii..];
    let grown = (ascii + rest.len() * 3) as u32;
    ptr = memory.realloc(ptr, capacity, grown, 1)?;
    capacity = grown;
    let encoded = to_utf8_lossy(rest);
    // realloc may have grown the memory; this goes through a fresh view.
    memory.write(ptr + ascii as u32, encoded.as_bytes())?;
    len += encoded.len();
    tracing::trace!(target: "glue_js::codec", ptr, ascii, len, capacity, "encoded with non-ascii tail");
  } else {
    tracing::trace!(target: "glue_js::codec", ptr, len, "encoded ascii");
  }
  Ok(Encoded {
    ptr,
    len: len as u32,
    capacity,
  })
}

fn utf8_len(units: &[u16]) -> usize {
  char::decode_utf16(units.iter().copied())
    .map(|c| c.map_or(char::REPLACEMENT_CHARACTER.len_utf8(), char::len_utf8))
    .sum()
}

fn to_utf8_lossy(units: &[u16]) -> String {
  char::decode_utf16(units.iter().copied())
    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
    .collect()
}

fn check_align(ptr: u32, align: u32) -> Result<(), Violation> {
  if ptr % align == 0 {
    Ok(())
  } else {
    Err(Violation::Misaligned { ptr, align })
  }
}

/// Writes `(first, second)` to the two i32 words at `retptr`. The second word is written first.
pub fn write_out_pair(
  memory: &mut GuestMemory,
  retptr: u32,
  first: i32,
  second: i32,
) -> Result<(), Violation> {
  check_align(retptr, 4)?;
  let words = memory.ints32();
  let base = (retptr / 4) as usize;
  words.set(base + 1, second)?;
  words.set(base, first)
}

pub fn read_out_pair(memory: &mut GuestMemory, retptr: u32) -> Result<(i32, i32), Violation> {
  check_align(retptr, 4)?;
  let words = memory.ints32();
  let base = (retptr / 4) as usize;
  Ok((words.get(base)?, words.get(base + 1)?))
}

/// Writes `(ptr, len)` of an encoded string, or `(0, 0)` for none.
pub fn write_out_string(
  memory: &mut GuestMemory,
  retptr: u32,
  encoded: Option<Encoded>,
) -> Result<(), Violation> {
  let (ptr, len) = encoded.map_or((0, 0), |e| (e.ptr as i32, e.len as i32));
  write_out_pair(memory, retptr, ptr, len)
}

/// Writes an optional f64: presence flag in the i32 at `retptr`, value in the f64 at `retptr + 8`.
pub fn write_out_f64(
  memory: &mut GuestMemory,
  retptr: u32,
  value: Option<f64>,
) -> Result<(), Violation> {
  check_align(retptr, 8)?;
  memory
    .floats64()
    .set((retptr / 8) as usize + 1, value.unwrap_or(0.0))?;
  memory
    .ints32()
    .set((retptr / 4) as usize, i32::from(value.is_some()))
}

pub fn read_out_f64(memory: &mut GuestMemory, retptr: u32) -> Result<Option<f64>, Violation> {
  check_align(retptr, 8)?;
  let present = memory.ints32().get((retptr / 4) as usize)? != 0;
  let value = memory.floats64().get((retptr / 8) as usize + 1)?;
  Ok(present.then_some(value))
}
