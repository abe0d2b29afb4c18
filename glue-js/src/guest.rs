use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::handle::Handle;
use ahash::AHashMap;
use std::fmt;
use std::rc::Rc;

/// A raw wasm value crossing the boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WasmValue {
  I32(i32),
  I64(i64),
  F32(f32),
  F64(f64),
}

impl WasmValue {
  pub fn as_i32(self) -> Option<i32> {
    match self {
      WasmValue::I32(v) => Some(v),
      _ => None,
    }
  }

  /// The i32 reinterpreted as unsigned, which is how pointers and handles travel.
  pub fn as_u32(self) -> Option<u32> {
    self.as_i32().map(|v| v as u32)
  }

  pub fn as_f64(self) -> Option<f64> {
    match self {
      WasmValue::F64(v) => Some(v),
      WasmValue::F32(v) => Some(v as f64),
      _ => None,
    }
  }

  pub fn as_handle(self) -> Option<Handle> {
    self.as_u32().map(Handle::from_raw)
  }
}

impl From<i32> for WasmValue {
  fn from(value: i32) -> Self {
    WasmValue::I32(value)
  }
}

impl From<u32> for WasmValue {
  fn from(value: u32) -> Self {
    WasmValue::I32(value as i32)
  }
}

impl From<f64> for WasmValue {
  fn from(value: f64) -> Self {
    WasmValue::F64(value)
  }
}

impl From<bool> for WasmValue {
  fn from(value: bool) -> Self {
    WasmValue::I32(i32::from(value))
  }
}

impl From<Handle> for WasmValue {
  fn from(value: Handle) -> Self {
    WasmValue::I32(value.index() as i32)
  }
}

/// A function in the guest's indirect function table.
pub type GuestFn = Rc<dyn Fn(&mut Bridge, &[WasmValue]) -> Result<Option<WasmValue>, BridgeError>>;

/// How a host value is lowered into guest words when calling into the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestArg {
  I32,
  U32,
  F64,
  Bool,
  /// Allocates a fresh handle the guest takes ownership of.
  Handle,
  /// Encodes into guest memory as `(ptr, len)`; the guest owns the allocation.
  Str,
}

/// How a guest return value is lifted back into a host value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestRet {
  Unit,
  I32,
  F64,
  Bool,
  /// The guest hands back ownership of a handle.
  Handle,
}

/// The guest-side trampoline a closure is invoked through.
///
/// The function at `func` receives the closure's two state words followed by the lowered `args`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestAdapter {
  pub name: &'static str,
  pub func: u32,
  pub args: &'static [GuestArg],
  pub ret: GuestRet,
}

/// Signature of a named guest export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportDescriptor {
  pub name: &'static str,
  pub args: &'static [GuestArg],
  pub ret: GuestRet,
}

impl ExportDescriptor {
  pub const fn new(name: &'static str, args: &'static [GuestArg], ret: GuestRet) -> Self {
    Self { name, args, ret }
  }
}

/// The guest's indirect function table plus its named exports.
#[derive(Clone, Default)]
pub struct GuestTable {
  entries: Vec<GuestFn>,
  exports: AHashMap<&'static str, u32>,
}

impl GuestTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends a function and returns its table index.
  pub fn push(
    &mut self,
    f: impl Fn(&mut Bridge, &[WasmValue]) -> Result<Option<WasmValue>, BridgeError> + 'static,
  ) -> u32 {
    self.entries.push(Rc::new(f));
    (self.entries.len() - 1) as u32
  }

  /// Appends a function that is also reachable by name.
  pub fn export(
    &mut self,
    name: &'static str,
    f: impl Fn(&mut Bridge, &[WasmValue]) -> Result<Option<WasmValue>, BridgeError> + 'static,
  ) -> u32 {
    let index = self.push(f);
    self.exports.insert(name, index);
    index
  }

  pub fn get(&self, index: u32) -> Option<GuestFn> {
    self.entries.get(index as usize).cloned()
  }

  pub fn export_index(&self, name: &str) -> Option<u32> {
    self.exports.get(name).copied()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for GuestTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GuestTable")
      .field("entries", &self.entries.len())
      .field("exports", &self.exports.keys().collect::<Vec<_>>())
      .finish()
  }
}
