//! Import descriptors, linking, and the marshalling that turns raw guest words into host values
//! and back.
//!
//! Every import is described by a [`CallDescriptor`]: one [`ArgRule`] per host-visible parameter
//! and a [`RetRule`] for the result. Rules that carry a string or byte range consume two words
//! `(ptr, len)`; out-parameter returns take a leading `retptr` word that is not listed among the
//! arguments.

use crate::bridge::Bridge;
use crate::closure::ClosureKind;
use crate::codec;
use crate::error::{BridgeError, Violation};
use crate::guest::{GuestAdapter, GuestArg, GuestRet, WasmValue};
use crate::handle::Handle;
use crate::intrinsics::{self, Intrinsic};
use crate::value::{HostObject, HostValue};
use ahash::AHashMap;
use std::fmt;
use std::rc::Rc;

/// Version of the import/export surface described in this module.
pub const ABI_VERSION: u32 = 1;

/// A host operation. An `Err` is a host exception.
/// A host operation. `Err(BridgeError::Throw(_))` is a thrown host exception; any other error is a
/// bridge failure that passes through the error channel untouched.
pub type HostOp = Rc<dyn Fn(&mut Bridge, &[HostValue]) -> Result<HostValue, BridgeError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgRule {
  I32,
  U32,
  F32,
  F64,
  /// Nonzero i32 is true.
  Bool,
  /// Borrows the value behind a handle.
  Handle,
  /// Handle 0 means absent.
  OptionalHandle,
  /// Consumes the handle.
  TakeHandle,
  /// `(ptr, len)` of UTF-8 bytes, copied into a host string.
  Str,
  /// Like `Str`, with ptr 0 meaning absent.
  OptionalStr,
  /// `(ptr, len)` lent to the host as a zero-copy byte view.
  Bytes,
  OptionalBytes,
}

impl ArgRule {
  pub const fn words(self) -> usize {
    match self {
      ArgRule::Str | ArgRule::OptionalStr | ArgRule::Bytes | ArgRule::OptionalBytes => 2,
      _ => 1,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetRule {
  Unit,
  /// Numbers are truncated modulo 2^32.
  I32,
  U32,
  F64,
  Bool,
  /// Allocates a handle for the result.
  Handle,
  /// Returns handle 0 for `undefined` or `null`.
  OptionalHandle,
  /// Writes `(ptr, len)` to the out-parameter.
  StringOut,
  /// Writes `(0, 0)` when the result is not a string.
  OptionalStringOut,
  /// Writes a presence flag and an f64 to the out-parameter.
  OptionalF64Out,
  /// 0 or 1 for booleans, 2 for anything else.
  BoolOrAbsent,
}

impl RetRule {
  pub const fn uses_out_param(self) -> bool {
    matches!(
      self,
      RetRule::StringOut | RetRule::OptionalStringOut | RetRule::OptionalF64Out
    )
  }
}

/// Static description of one import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallDescriptor {
  pub name: &'static str,
  pub args: &'static [ArgRule],
  pub ret: RetRule,
  /// Host exceptions are caught into the error channel instead of unwinding.
  pub fallible: bool,
}

impl CallDescriptor {
  pub const fn new(name: &'static str, args: &'static [ArgRule], ret: RetRule) -> Self {
    Self {
      name,
      args,
      ret,
      fallible: false,
    }
  }

  pub const fn fallible(mut self) -> Self {
    self.fallible = true;
    self
  }

  /// Number of raw words the guest passes, `retptr` included.
  pub fn words(&self) -> usize {
    let args: usize = self.args.iter().map(|rule| rule.words()).sum();
    args + usize::from(self.ret.uses_out_param())
  }
}

/// The set of operations a host environment offers, keyed by import name.
#[derive(Clone)]
pub struct HostImports {
  abi_version: u32,
  entries: AHashMap<&'static str, (CallDescriptor, HostOp)>,
}

impl Default for HostImports {
  fn default() -> Self {
    Self::new()
  }
}

impl HostImports {
  pub fn new() -> Self {
    Self::with_abi_version(ABI_VERSION)
  }

  pub fn with_abi_version(abi_version: u32) -> Self {
    Self {
      abi_version,
      entries: AHashMap::new(),
    }
  }

  pub fn abi_version(&self) -> u32 {
    self.abi_version
  }

  /// Registers `op` under `descriptor.name`, replacing any earlier registration. Names that
  /// collide with a built-in intrinsic are shadowed by the intrinsic at link time.
  pub fn register(
    &mut self,
    descriptor: CallDescriptor,
    op: impl Fn(&mut Bridge, &[HostValue]) -> Result<HostValue, BridgeError> + 'static,
  ) -> &mut Self {
    self.entries.insert(descriptor.name, (descriptor, Rc::new(op)));
    self
  }

  pub fn contains(&self, name: &str) -> bool {
    self.entries.contains_key(name)
  }

  pub fn descriptor(&self, name: &str) -> Option<CallDescriptor> {
    self.entries.get(name).map(|(descriptor, _)| *descriptor)
  }

  fn get(&self, name: &str) -> Option<(CallDescriptor, HostOp)> {
    self.entries.get(name).cloned()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for HostImports {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<_> = self.entries.keys().collect();
    names.sort();
    f.debug_struct("HostImports")
      .field("abi_version", &self.abi_version)
      .field("names", &names)
      .finish()
  }
}

/// One import the guest module declares.
#[derive(Clone, Copy, Debug)]
pub enum ImportDecl {
  /// A host operation or intrinsic, resolved by name.
  Named(&'static str),
  /// A closure constructor with the destructor and adapter baked in. Called with the closure's
  /// two state words, it returns a handle to a callable host object.
  Closure {
    name: &'static str,
    dtor: u32,
    adapter: GuestAdapter,
    kind: ClosureKind,
  },
}

impl ImportDecl {
  pub fn name(&self) -> &'static str {
    match self {
      ImportDecl::Named(name) | ImportDecl::Closure { name, .. } => *name,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportId(u32);

impl ImportId {
  pub fn index(self) -> u32 {
    self.0
  }
}

#[derive(Clone)]
enum Target {
  Intrinsic(Intrinsic),
  Host(CallDescriptor, HostOp),
  Closure {
    dtor: u32,
    adapter: GuestAdapter,
    kind: ClosureKind,
  },
  Unsupported,
}

#[derive(Clone)]
struct LinkedImport {
  name: &'static str,
  target: Target,
}

#[derive(Default)]
pub(crate) struct ImportTable {
  linked: Vec<LinkedImport>,
  by_name: AHashMap<&'static str, ImportId>,
}

impl ImportTable {
  pub(crate) fn len(&self) -> usize {
    self.linked.len()
  }

  pub(crate) fn unsupported(&self) -> usize {
    self
      .linked
      .iter()
      .filter(|import| matches!(import.target, Target::Unsupported))
      .count()
  }
}

fn word_i32(import: &'static str, words: &[WasmValue], index: usize) -> Result<i32, Violation> {
  match words.get(index) {
    Some(WasmValue::I32(v)) => Ok(*v),
    _ => Err(Violation::ArgTypeMismatch { import, index }),
  }
}

fn word_u32(import: &'static str, words: &[WasmValue], index: usize) -> Result<u32, Violation> {
  word_i32(import, words, index).map(|v| v as u32)
}

/// ToInt32: truncate, then wrap modulo 2^32. Non-finite values become 0.
pub(crate) fn to_int32(n: f64) -> i32 {
  if !n.is_finite() {
    return 0;
  }
  n.trunc().rem_euclid(4294967296.0) as u32 as i32
}

impl Bridge {
  /// Resolves the guest's declared imports against the intrinsics and the host.
  ///
  /// Names the host does not provide still link; calling them reports
  /// [`BridgeError::Unsupported`]. Declaring the same name twice yields the same id.
  pub fn link(&mut self, decls: &[ImportDecl]) -> Result<Vec<ImportId>, BridgeError> {
    self.check_poisoned()?;
    let mut ids = Vec::with_capacity(decls.len());
    for decl in decls {
      let name = decl.name();
      if let Some(&id) = self.imports.by_name.get(name) {
        ids.push(id);
        continue;
      }
      let target = match *decl {
        ImportDecl::Named(name) => match Intrinsic::from_name(name) {
          Some(intrinsic) => Target::Intrinsic(intrinsic),
          None => match self.host.get(name) {
            Some((descriptor, op)) => Target::Host(descriptor, op),
            None => {
              tracing::warn!(target: "glue_js::dispatch", import = name, "host does not provide import");
              Target::Unsupported
            }
          },
        },
        ImportDecl::Closure {
          dtor,
          adapter,
          kind,
          ..
        } => Target::Closure { dtor, adapter, kind },
      };
      let id = ImportId(self.imports.linked.len() as u32);
      self.imports.linked.push(LinkedImport { name, target });
      self.imports.by_name.insert(name, id);
      ids.push(id);
    }
    tracing::debug!(
      target: "glue_js::dispatch",
      linked = self.imports.len(),
      unsupported = self.imports.unsupported(),
      "link"
    );
    Ok(ids)
  }

  /// Looks up a linked import by name.
  pub fn import(&self, name: &str) -> Result<ImportId, BridgeError> {
    self
      .imports
      .by_name
      .get(name)
      .copied()
      .ok_or_else(|| BridgeError::UnresolvedImport {
        name: name.to_string(),
      })
  }

  /// Entry point for every guest-to-host call.
  pub fn call(
    &mut self,
    id: ImportId,
    words: &[WasmValue],
  ) -> Result<Option<WasmValue>, BridgeError> {
    self.check_poisoned()?;
    let Some(import) = self.imports.linked.get(id.0 as usize).cloned() else {
      return self.observe(Err(Violation::UnknownImport(id.0).into()));
    };
    let span = tracing::debug_span!(target: "glue_js::dispatch", "call", import = import.name);
    let _enter = span.enter();
    if let Some(pending) = self.exn.peek() {
      tracing::warn!(target: "glue_js::dispatch", ?pending, "call made with an exception still pending");
    }
    let result = self.dispatch(&import, words);
    self.observe(result)
  }

  fn dispatch(
    &mut self,
    import: &LinkedImport,
    words: &[WasmValue],
  ) -> Result<Option<WasmValue>, BridgeError> {
    let (descriptor, outcome_of) = match &import.target {
      Target::Unsupported => {
        tracing::warn!(target: "glue_js::dispatch", import = import.name, "unsupported");
        return Err(BridgeError::Unsupported {
          import: import.name.to_string(),
        });
      }
      Target::Closure { dtor, adapter, kind } => {
        if words.len() < 2 {
          return Err(
            Violation::ArityMismatch {
              import: import.name,
              expected: 2,
              got: words.len(),
            }
            .into(),
          );
        }
        let a = word_u32(import.name, words, 0)?;
        let b = word_u32(import.name, words, 1)?;
        let handle = self.register_closure(a, b, *dtor, *adapter, *kind)?;
        return Ok(Some(handle.into()));
      }
      Target::Intrinsic(intrinsic) => (intrinsic.descriptor(), Callee::Intrinsic(*intrinsic)),
      Target::Host(descriptor, op) => (*descriptor, Callee::Host(op.clone())),
    };

    if words.len() != descriptor.words() {
      return Err(
        Violation::ArityMismatch {
          import: descriptor.name,
          expected: descriptor.words(),
          got: words.len(),
        }
        .into(),
      );
    }
    let (retptr, rest) = if descriptor.ret.uses_out_param() {
      (Some(word_u32(descriptor.name, words, 0)?), &words[1..])
    } else {
      (None, words)
    };
    let args = self.lift_args(&descriptor, rest)?;
    let outcome = match outcome_of {
      Callee::Intrinsic(intrinsic) => intrinsics::run(self, intrinsic, &args),
      Callee::Host(op) => op(self, &args),
    };
    match outcome {
      Ok(value) => self.lower_result(&descriptor, retptr, value),
      Err(BridgeError::Throw(exception)) if descriptor.fallible => {
        tracing::debug!(target: "glue_js::dispatch", import = descriptor.name, "host exception caught");
        self.store_exception(exception);
        Err(BridgeError::ExceptionPending)
      }
      Err(err) => Err(err),
    }
  }

  fn lift_args(
    &mut self,
    descriptor: &CallDescriptor,
    words: &[WasmValue],
  ) -> Result<Vec<HostValue>, BridgeError> {
    let import = descriptor.name;
    let mut args = Vec::with_capacity(descriptor.args.len());
    let mut index = 0;
    for rule in descriptor.args {
      let value = match rule {
        ArgRule::I32 => HostValue::Number(word_i32(import, words, index)? as f64),
        ArgRule::U32 => HostValue::Number(word_u32(import, words, index)? as f64),
        ArgRule::F32 => match words.get(index) {
          Some(WasmValue::F32(v)) => HostValue::Number(*v as f64),
          _ => return Err(Violation::ArgTypeMismatch { import, index }.into()),
        },
        ArgRule::F64 => match words.get(index) {
          Some(WasmValue::F64(v)) => HostValue::Number(*v),
          _ => return Err(Violation::ArgTypeMismatch { import, index }.into()),
        },
        ArgRule::Bool => HostValue::Bool(word_i32(import, words, index)? != 0),
        ArgRule::Handle => {
          let handle = Handle::from_raw(word_u32(import, words, index)?);
          self.heap().resolve(handle)?.clone()
        }
        ArgRule::OptionalHandle => match word_u32(import, words, index)? {
          0 => HostValue::Undefined,
          raw => self.heap().resolve(Handle::from_raw(raw))?.clone(),
        },
        ArgRule::TakeHandle => {
          let handle = Handle::from_raw(word_u32(import, words, index)?);
          self.heap_mut().take(handle)?
        }
        ArgRule::Str | ArgRule::OptionalStr => {
          let ptr = word_u32(import, words, index)?;
          let len = word_u32(import, words, index + 1)?;
          if ptr == 0 && *rule == ArgRule::OptionalStr {
            HostValue::Undefined
          } else {
            HostValue::String(self.decode_string(ptr, len)?)
          }
        }
        ArgRule::Bytes | ArgRule::OptionalBytes => {
          let ptr = word_u32(import, words, index)?;
          let len = word_u32(import, words, index + 1)?;
          if ptr == 0 && *rule == ArgRule::OptionalBytes {
            HostValue::Undefined
          } else {
            HostValue::Object(HostObject::bytes(self.borrow_bytes(ptr, len)?))
          }
        }
      };
      index += rule.words();
      args.push(value);
    }
    Ok(args)
  }

  fn lower_result(
    &mut self,
    descriptor: &CallDescriptor,
    retptr: Option<u32>,
    value: HostValue,
  ) -> Result<Option<WasmValue>, BridgeError> {
    let mismatch = || Violation::ResultMismatch {
      import: descriptor.name,
      rule: descriptor.ret,
    };
    let word = match descriptor.ret {
      RetRule::Unit => return Ok(None),
      RetRule::I32 | RetRule::U32 => WasmValue::I32(to_int32(value.as_number().ok_or_else(mismatch)?)),
      RetRule::F64 => WasmValue::F64(value.as_number().ok_or_else(mismatch)?),
      RetRule::Bool => WasmValue::from(value.as_bool().ok_or_else(mismatch)?),
      RetRule::Handle => self.heap_mut().allocate(value).into(),
      RetRule::OptionalHandle if value.is_like_none() => Handle::UNDEFINED.into(),
      RetRule::OptionalHandle => self.heap_mut().allocate(value).into(),
      RetRule::BoolOrAbsent => WasmValue::I32(match value {
        HostValue::Bool(b) => i32::from(b),
        _ => 2,
      }),
      RetRule::StringOut | RetRule::OptionalStringOut => {
        let retptr = retptr.ok_or_else(mismatch)?;
        let encoded = match value {
          HostValue::String(text) => Some(self.encode_string(&text)?),
          _ if descriptor.ret == RetRule::OptionalStringOut => None,
          _ => return Err(mismatch().into()),
        };
        codec::write_out_string(&mut self.memory, retptr, encoded)?;
        return Ok(None);
      }
      RetRule::OptionalF64Out => {
        let retptr = retptr.ok_or_else(mismatch)?;
        codec::write_out_f64(&mut self.memory, retptr, value.as_number())?;
        return Ok(None);
      }
    };
    Ok(Some(word))
  }

  /// Lowers host values into guest words for a call into the guest. Missing trailing values are
  /// `undefined`; extra ones are ignored. On failure, handles lowered for earlier arguments are
  /// dropped again before the error is returned.
  pub(crate) fn lower_guest_args(
    &mut self,
    owner: &'static str,
    rules: &[GuestArg],
    values: &[HostValue],
  ) -> Result<Vec<WasmValue>, BridgeError> {
    let mut words: Vec<WasmValue> = Vec::with_capacity(rules.len());
    let mut handles: Vec<Handle> = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
      let value = values.get(index).cloned().unwrap_or_default();
      if let Err(err) = self.lower_guest_arg(owner, index, rule, value, &mut words, &mut handles) {
        for handle in handles {
          if self.heap_mut().drop(handle).is_err() {
            tracing::warn!(target: "glue_js::dispatch", owner, ?handle, "argument handle already gone");
          }
        }
        return Err(err);
      }
    }
    Ok(words)
  }

  fn lower_guest_arg(
    &mut self,
    owner: &'static str,
    index: usize,
    rule: &GuestArg,
    value: HostValue,
    words: &mut Vec<WasmValue>,
    handles: &mut Vec<Handle>,
  ) -> Result<(), BridgeError> {
    let mismatch = || Violation::ArgTypeMismatch {
      import: owner,
      index,
    };
    match rule {
      GuestArg::I32 | GuestArg::U32 => {
        words.push(WasmValue::I32(to_int32(value.as_number().ok_or_else(mismatch)?)))
      }
      GuestArg::F64 => words.push(WasmValue::F64(value.as_number().ok_or_else(mismatch)?)),
      GuestArg::Bool => words.push(value.as_bool().ok_or_else(mismatch)?.into()),
      GuestArg::Handle => {
        let handle = self.heap_mut().allocate(value);
        handles.push(handle);
        words.push(handle.into());
      }
      GuestArg::Str => {
        let text = value.as_string().ok_or_else(mismatch)?;
        let encoded = self.encode_string(text)?;
        words.push(encoded.ptr.into());
        words.push(encoded.len.into());
      }
    }
    Ok(())
  }

  pub(crate) fn lift_guest_result(
    &mut self,
    owner: &'static str,
    ret: GuestRet,
    word: Option<WasmValue>,
  ) -> Result<HostValue, BridgeError> {
    let mismatch = || Violation::GuestResultMismatch { owner };
    Ok(match ret {
      GuestRet::Unit => HostValue::Undefined,
      GuestRet::I32 => HostValue::Number(word.and_then(WasmValue::as_i32).ok_or_else(mismatch)? as f64),
      GuestRet::F64 => HostValue::Number(word.and_then(WasmValue::as_f64).ok_or_else(mismatch)?),
      GuestRet::Bool => HostValue::Bool(word.and_then(WasmValue::as_i32).ok_or_else(mismatch)? != 0),
      GuestRet::Handle => {
        let handle = word.and_then(WasmValue::as_handle).ok_or_else(mismatch)?;
        self.heap_mut().take(handle)?
      }
    })
  }
}

enum Callee {
  Intrinsic(Intrinsic),
  Host(HostOp),
}
