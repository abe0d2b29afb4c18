use crate::bridge::Bridge;
use crate::error::{BridgeError, Violation};
use crate::guest::{GuestAdapter, WasmValue};
use crate::handle::Handle;
use crate::value::{HostObject, HostValue};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosureKind {
  /// `FnMut`: the state words are unavailable while an invocation is in flight, so a nested
  /// invocation is rejected.
  Mut,
  /// `Fn`: nested invocations are allowed.
  Shared,
}

/// Outcome of the guest releasing its reference to a closure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Teardown {
  /// No invocation was in flight; the guest destroys the state itself.
  Immediate,
  /// The last in-flight invocation will run the destructor when it returns.
  Deferred,
}

/// Host-side record of a guest closure.
///
/// `count` is one for the guest's own reference plus one per in-flight invocation. The closure is
/// torn down exactly once, when `count` first reaches zero.
pub struct ClosureState {
  a: Cell<u32>,
  b: u32,
  count: Cell<u32>,
  dtor: u32,
  adapter: GuestAdapter,
  kind: ClosureKind,
}

impl ClosureState {
  fn new(a: u32, b: u32, dtor: u32, adapter: GuestAdapter, kind: ClosureKind) -> Self {
    Self {
      a: Cell::new(a),
      b,
      count: Cell::new(1),
      dtor,
      adapter,
      kind,
    }
  }

  pub fn kind(&self) -> ClosureKind {
    self.kind
  }

  pub fn ref_count(&self) -> u32 {
    self.count.get()
  }

  pub fn is_consumed(&self) -> bool {
    self.count.get() == 0
  }

  /// The first state word as currently visible; zero while a `Mut` closure runs and after teardown.
  pub fn state_word(&self) -> u32 {
    self.a.get()
  }

  pub fn adapter(&self) -> GuestAdapter {
    self.adapter
  }

  fn enter(&self) -> Result<u32, Violation> {
    let count = self.count.get();
    if count == 0 {
      return Err(Violation::ClosureConsumed);
    }
    let a = self.a.get();
    if self.kind == ClosureKind::Mut {
      if a == 0 {
        return Err(Violation::ClosureReentered);
      }
      self.a.set(0);
    }
    self.count.set(count + 1);
    Ok(a)
  }

  /// Returns true when this exit dropped the last reference.
  fn exit(&self, a: u32) -> bool {
    let remaining = self.count.get().saturating_sub(1);
    self.count.set(remaining);
    if remaining == 0 {
      self.a.set(0);
      return true;
    }
    if self.kind == ClosureKind::Mut {
      self.a.set(a);
    }
    false
  }

  fn release(&self) -> Result<Teardown, Violation> {
    match self.count.get() {
      0 => Err(Violation::ClosureConsumed),
      1 => {
        self.count.set(0);
        self.a.set(0);
        Ok(Teardown::Immediate)
      }
      n => {
        self.count.set(n - 1);
        Ok(Teardown::Deferred)
      }
    }
  }
}

impl fmt::Debug for ClosureState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClosureState")
      .field("a", &self.a.get())
      .field("b", &self.b)
      .field("count", &self.count.get())
      .field("kind", &self.kind)
      .finish()
  }
}

impl Bridge {
  /// Wraps the guest closure `(a, b)` in a callable host object and returns a handle to it.
  pub fn register_closure(
    &mut self,
    a: u32,
    b: u32,
    dtor: u32,
    adapter: GuestAdapter,
    kind: ClosureKind,
  ) -> Result<Handle, BridgeError> {
    if a == 0 {
      return Err(Violation::NullClosureState.into());
    }
    for func in [dtor, adapter.func] {
      if self.guest().get(func).is_none() {
        return Err(Violation::UnknownGuestFunction(func).into());
      }
    }
    let state = Rc::new(ClosureState::new(a, b, dtor, adapter, kind));
    self.closures_live += 1;
    let handle = self
      .heap_mut()
      .allocate(HostValue::Object(HostObject::closure(state)));
    tracing::debug!(target: "glue_js::closure", a, b, dtor, adapter = adapter.name, ?kind, ?handle, "registered");
    Ok(handle)
  }

  /// Releases the guest's handle to a closure. Returns true if the guest must run the destructor
  /// now; false if an in-flight invocation will run it.
  pub fn drop_closure(&mut self, handle: Handle) -> Result<bool, BridgeError> {
    let value = self.heap_mut().take(handle)?;
    self.release_closure(&value)
  }

  pub(crate) fn release_closure(&mut self, value: &HostValue) -> Result<bool, BridgeError> {
    let state = value
      .as_object()
      .and_then(HostObject::as_closure)
      .ok_or(Violation::NotAClosure)?;
    match state.release()? {
      Teardown::Immediate => {
        self.closures_live = self.closures_live.saturating_sub(1);
        tracing::debug!(target: "glue_js::closure", "released; guest tears down");
        Ok(true)
      }
      Teardown::Deferred => {
        tracing::debug!(target: "glue_js::closure", in_flight = state.ref_count(), "released; teardown deferred");
        Ok(false)
      }
    }
  }

  pub(crate) fn invoke_closure(
    &mut self,
    state: &Rc<ClosureState>,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    let a = state.enter()?;
    tracing::trace!(target: "glue_js::closure", adapter = state.adapter.name, depth = state.ref_count() - 1, "invoke");
    let result = self.run_adapter(state, a, args);
    if state.exit(a) {
      self.closures_live = self.closures_live.saturating_sub(1);
      tracing::debug!(target: "glue_js::closure", dtor = state.dtor, "deferred teardown");
      let torn_down = self.call_guest(state.dtor, &[a.into(), state.b.into()]);
      return result.and_then(|value| torn_down.map(|_| value));
    }
    result
  }

  fn run_adapter(
    &mut self,
    state: &ClosureState,
    a: u32,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    let adapter = state.adapter;
    let mut words: Vec<WasmValue> = vec![a.into(), state.b.into()];
    words.extend(self.lower_guest_args(adapter.name, adapter.args, args)?);
    let ret = self.call_guest(adapter.func, &words)?;
    self.lift_guest_result(adapter.name, adapter.ret, ret)
  }
}
