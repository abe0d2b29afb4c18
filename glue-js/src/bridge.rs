use crate::codec::{self, EncodeMode, Encoded};
use crate::dispatch::{HostImports, ImportTable};
use crate::error::{BridgeError, Violation};
use crate::exn::ErrorChannel;
use crate::guest::{ExportDescriptor, GuestTable, WasmValue};
use crate::handle::Handle;
use crate::heap::HandleTable;
use crate::memory::{BumpAllocator, GuestAllocator, GuestMemory, LinearMemory};
use crate::options::BridgeOptions;
use crate::value::{HostObject, HostValue, JsString, ObjectKind};
use crate::view::ByteView;

/// What was still alive when a bridge was torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisposeReport {
  pub leaked_handles: usize,
  pub live_closures: usize,
  pub pending_exception: bool,
  pub pages: u32,
  pub poisoned: Option<Violation>,
}

/// One guest instance and everything the host keeps on its behalf.
///
/// The bridge is single-threaded and re-entrant: host operations receive `&mut Bridge` and may
/// call back into the guest, which may call further imports, to any depth.
pub struct Bridge {
  pub(crate) options: BridgeOptions,
  pub(crate) memory: GuestMemory,
  pub(crate) heap: HandleTable,
  pub(crate) exn: ErrorChannel,
  pub(crate) host: HostImports,
  pub(crate) imports: ImportTable,
  pub(crate) guest: GuestTable,
  pub(crate) closures_live: usize,
  memory_object: HostObject,
  vector_len: u32,
  poisoned: Option<Violation>,
}

impl Bridge {
  pub fn instantiate(
    options: BridgeOptions,
    host: HostImports,
    guest: GuestTable,
    allocator: Box<dyn GuestAllocator>,
  ) -> Result<Self, BridgeError> {
    options.validate()?;
    if host.abi_version() != options.abi_version {
      return Err(BridgeError::AbiMismatch {
        expected: options.abi_version,
        found: host.abi_version(),
      });
    }
    let linear = LinearMemory::new(options.initial_pages, options.max_pages)?;
    let memory_object = HostObject::memory(linear.clone());
    tracing::debug!(
      target: "glue_js::bridge",
      pages = options.initial_pages,
      host_imports = host.len(),
      guest_functions = guest.len(),
      "instantiate"
    );
    Ok(Self {
      heap: HandleTable::with_capacity(options.heap_capacity),
      memory: GuestMemory::new(linear, allocator),
      exn: ErrorChannel::new(),
      host,
      imports: ImportTable::default(),
      guest,
      closures_live: 0,
      memory_object,
      vector_len: 0,
      poisoned: None,
      options,
    })
  }

  /// Default options and a bump allocator.
  pub fn with_defaults(host: HostImports, guest: GuestTable) -> Result<Self, BridgeError> {
    Self::instantiate(
      BridgeOptions::default(),
      host,
      guest,
      Box::new(BumpAllocator::default()),
    )
  }

  pub fn options(&self) -> &BridgeOptions {
    &self.options
  }

  pub fn heap(&self) -> &HandleTable {
    &self.heap
  }

  pub fn heap_mut(&mut self) -> &mut HandleTable {
    &mut self.heap
  }

  pub fn memory(&self) -> &GuestMemory {
    &self.memory
  }

  pub fn memory_mut(&mut self) -> &mut GuestMemory {
    &mut self.memory
  }

  pub fn guest(&self) -> &GuestTable {
    &self.guest
  }

  pub fn guest_mut(&mut self) -> &mut GuestTable {
    &mut self.guest
  }

  pub fn host_imports(&self) -> &HostImports {
    &self.host
  }

  /// The host object standing for the guest's memory. Always the same object.
  pub fn memory_object(&self) -> HostObject {
    self.memory_object.clone()
  }

  /// Byte length of the most recently encoded string.
  pub fn vector_len(&self) -> u32 {
    self.vector_len
  }

  pub fn live_closures(&self) -> usize {
    self.closures_live
  }

  pub fn decode_string(&mut self, ptr: u32, len: u32) -> Result<JsString, BridgeError> {
    codec::decode(&mut self.memory, ptr, len, self.options.max_string_bytes)
  }

  pub fn encode_string(&mut self, text: &JsString) -> Result<Encoded, BridgeError> {
    self.encode_string_with(text, EncodeMode::Growable)
  }

  pub fn encode_string_with(
    &mut self,
    text: &JsString,
    mode: EncodeMode,
  ) -> Result<Encoded, BridgeError> {
    let encoded = codec::encode_into(&mut self.memory, text, mode, self.options.max_string_bytes)?;
    self.vector_len = encoded.len;
    Ok(encoded)
  }

  pub fn borrow_bytes(&mut self, ptr: u32, len: u32) -> Result<ByteView, BridgeError> {
    Ok(self.memory.borrow_bytes(ptr, len)?)
  }

  /// Parks a host exception for the guest and returns the handle it will receive.
  pub fn store_exception(&mut self, exception: HostValue) -> Handle {
    let handle = self.heap.allocate(exception);
    if let Some(previous) = self.exn.store(handle) {
      tracing::warn!(target: "glue_js::exn", ?previous, "replaced an exception the guest never took");
      if let Err(err) = self.heap.drop(previous) {
        tracing::debug!(target: "glue_js::exn", %err, "replaced exception was already released");
      }
    }
    handle
  }

  pub fn pending_exception(&self) -> Option<Handle> {
    self.exn.peek()
  }

  /// Clears the error channel, transferring the handle to the caller.
  pub fn take_exception(&mut self) -> Option<Handle> {
    self.exn.take()
  }

  pub fn exceptions_raised(&self) -> u64 {
    self.exn.raised()
  }

  /// Calls an entry of the guest's function table.
  pub fn call_guest(
    &mut self,
    func: u32,
    words: &[WasmValue],
  ) -> Result<Option<WasmValue>, BridgeError> {
    let f = self
      .guest
      .get(func)
      .ok_or(Violation::UnknownGuestFunction(func))?;
    f(self, words)
  }

  /// Calls a named guest export with host values.
  pub fn call_export(
    &mut self,
    export: &ExportDescriptor,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    self.check_poisoned()?;
    let span = tracing::debug_span!(target: "glue_js::dispatch", "export", name = export.name);
    let _enter = span.enter();
    let result = self.run_export(export, args);
    self.observe(result)
  }

  fn run_export(
    &mut self,
    export: &ExportDescriptor,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    let func = self
      .guest
      .export_index(export.name)
      .ok_or_else(|| BridgeError::UnresolvedExport {
        name: export.name.to_string(),
      })?;
    let words = self.lower_guest_args(export.name, export.args, args)?;
    let ret = self.call_guest(func, &words)?;
    self.lift_guest_result(export.name, export.ret, ret)
  }

  /// Calls a host callable: a host function or a guest closure.
  pub fn invoke(
    &mut self,
    callee: &HostValue,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    self.check_poisoned()?;
    let result = match callee.as_object().map(HostObject::kind) {
      Some(ObjectKind::Function(f)) => f.op()(self, args),
      Some(ObjectKind::Closure(state)) => {
        let state = state.clone();
        self.invoke_closure(&state, args)
      }
      _ => Err(BridgeError::Throw(HostValue::Object(HostObject::error(
        "TypeError",
        "value is not a function",
      )))),
    };
    self.observe(result)
  }

  /// [`invoke`](Self::invoke) with host exception semantics: recoverable bridge failures are
  /// thrown as a `RuntimeError`. Violations and [`BridgeError::Poisoned`] pass through unchanged,
  /// so a host operation that calls back into the guest cannot turn them into exceptions.
  pub fn call_function(
    &mut self,
    callee: &HostValue,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    match self.invoke(callee, args) {
      Err(err) if !err.is_fatal() && !matches!(err, BridgeError::Throw(_)) => Err(
        BridgeError::Throw(HostValue::Object(HostObject::error("RuntimeError", &err.to_string()))),
      ),
      result => result,
    }
  }

  pub fn is_poisoned(&self) -> bool {
    self.poisoned.is_some()
  }

  pub fn poisoned_by(&self) -> Option<&Violation> {
    self.poisoned.as_ref()
  }

  pub(crate) fn check_poisoned(&self) -> Result<(), BridgeError> {
    match &self.poisoned {
      Some(violation) => Err(BridgeError::Poisoned(violation.clone())),
      None => Ok(()),
    }
  }

  /// Records the first violation that passes through a bridge entry point.
  pub(crate) fn observe<T>(&mut self, result: Result<T, BridgeError>) -> Result<T, BridgeError> {
    if let Err(BridgeError::Violation(violation)) = &result {
      if self.poisoned.is_none() {
        tracing::error!(target: "glue_js::bridge", %violation, "bridge poisoned");
        self.poisoned = Some(violation.clone());
      }
    }
    result
  }

  pub fn dispose(self) -> DisposeReport {
    let report = DisposeReport {
      leaked_handles: self.heap.live(),
      live_closures: self.closures_live,
      pending_exception: self.exn.is_pending(),
      pages: self.memory.linear().pages(),
      poisoned: self.poisoned,
    };
    if report.leaked_handles > 0 || report.live_closures > 0 {
      tracing::warn!(
        target: "glue_js::bridge",
        leaked_handles = report.leaked_handles,
        live_closures = report.live_closures,
        "disposed with live references"
      );
    } else {
      tracing::debug!(target: "glue_js::bridge", "disposed");
    }
    report
  }
}
