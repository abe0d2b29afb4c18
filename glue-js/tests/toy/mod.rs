#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use glue_js::{
  codec, Bridge, BridgeError, BridgeOptions, BumpAllocator, ClosureKind, GuestAdapter, GuestArg,
  GuestRet, GuestTable, Handle, HostImports, ImportDecl, Intrinsic, WasmValue,
};

/// Scratch word pair the toy guest uses for out-parameters.
pub const RETPTR: u32 = 16;
/// Second state word of every toy closure.
pub const VTABLE: u32 = 7;

pub const CLOSURE_MUT: &str = "closure_mut";
pub const CLOSURE_SHARED: &str = "closure_shared";

pub type Hook = Rc<dyn Fn(&mut Bridge, &[WasmValue]) -> Result<Option<WasmValue>, BridgeError>>;

#[derive(Debug, Default)]
pub struct Journal {
  pub destroyed: Vec<(u32, u32)>,
  /// State words and extra arguments of each adapter invocation.
  pub invoked: Vec<(u32, u32, Vec<WasmValue>)>,
}

/// A hand-written stand-in for a compiled guest module.
///
/// Its function table holds a closure destructor and a closure adapter that both write to a
/// shared [`Journal`]; the adapter then runs whatever [`Hook`] the test installed.
pub struct Toy {
  pub bridge: Bridge,
  pub journal: Rc<RefCell<Journal>>,
  hook: Rc<RefCell<Option<Hook>>>,
  next_state: Cell<u32>,
  dtor: u32,
}

fn raw(word: WasmValue) -> u32 {
  word.as_u32().unwrap_or(u32::MAX)
}

impl Toy {
  pub fn new(host: HostImports) -> Self {
    Self::with_options(host, BridgeOptions::default())
  }

  pub fn with_options(host: HostImports, options: BridgeOptions) -> Self {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let hook: Rc<RefCell<Option<Hook>>> = Rc::new(RefCell::new(None));
    let mut guest = GuestTable::new();

    let log = journal.clone();
    let dtor = guest.push(move |_, words| {
      log
        .borrow_mut()
        .destroyed
        .push((raw(words[0]), raw(words[1])));
      Ok(None)
    });

    let log = journal.clone();
    let installed = hook.clone();
    let adapter = guest.push(move |bridge, words| {
      log
        .borrow_mut()
        .invoked
        .push((raw(words[0]), raw(words[1]), words[2..].to_vec()));
      let hook = installed.borrow().clone();
      match hook {
        Some(hook) => hook(bridge, words),
        None => Ok(None),
      }
    });

    let mut bridge =
      Bridge::instantiate(options, host, guest, Box::new(BumpAllocator::default())).unwrap();

    let mut decls: Vec<ImportDecl> = Intrinsic::all()
      .map(|intrinsic| ImportDecl::Named(intrinsic.name()))
      .collect();
    for (name, kind) in [
      (CLOSURE_MUT, ClosureKind::Mut),
      (CLOSURE_SHARED, ClosureKind::Shared),
    ] {
      decls.push(ImportDecl::Closure {
        name,
        dtor,
        adapter: GuestAdapter {
          name: "toy_adapter",
          func: adapter,
          args: &[GuestArg::F64],
          ret: GuestRet::Unit,
        },
        kind,
      });
    }
    bridge.link(&decls).unwrap();

    Self {
      bridge,
      journal,
      hook,
      next_state: Cell::new(100),
      dtor,
    }
  }

  pub fn link(&mut self, names: &[&'static str]) {
    let decls: Vec<ImportDecl> = names.iter().map(|&name| ImportDecl::Named(name)).collect();
    self.bridge.link(&decls).unwrap();
  }

  pub fn call(
    &mut self,
    name: &str,
    words: &[WasmValue],
  ) -> Result<Option<WasmValue>, BridgeError> {
    let id = self.bridge.import(name)?;
    self.bridge.call(id, words)
  }

  pub fn call_handle(&mut self, name: &str, words: &[WasmValue]) -> Result<Handle, BridgeError> {
    let word = self.call(name, words)?;
    Ok(word.and_then(WasmValue::as_handle).unwrap_or(Handle::UNDEFINED))
  }

  pub fn set_hook(
    &self,
    hook: impl Fn(&mut Bridge, &[WasmValue]) -> Result<Option<WasmValue>, BridgeError> + 'static,
  ) {
    *self.hook.borrow_mut() = Some(Rc::new(hook));
  }

  /// Copies `text` into guest memory the way compiled guest code would, returning `(ptr, len)`.
  pub fn put_str(&mut self, text: &str) -> (WasmValue, WasmValue) {
    let len = text.len() as u32;
    let memory = self.bridge.memory_mut();
    let ptr = memory.malloc(len, 1).unwrap();
    memory.write(ptr, text.as_bytes()).unwrap();
    (ptr.into(), len.into())
  }

  pub fn string_new(&mut self, text: &str) -> Handle {
    let (ptr, len) = self.put_str(text);
    self
      .call_handle(Intrinsic::StringNew.name(), &[ptr, len])
      .unwrap()
  }

  pub fn number_new(&mut self, value: f64) -> Handle {
    self
      .call_handle(Intrinsic::NumberNew.name(), &[value.into()])
      .unwrap()
  }

  /// Reads a `(ptr, len)` string out-parameter. `None` when ptr is 0.
  pub fn read_out_string(&mut self, retptr: u32) -> Option<String> {
    let memory = self.bridge.memory_mut();
    let (ptr, len) = codec::read_out_pair(memory, retptr).unwrap();
    if ptr == 0 {
      return None;
    }
    let bytes = memory.read(ptr as u32, len as u32).unwrap();
    Some(String::from_utf8(bytes).unwrap())
  }

  /// Registers a fresh closure through the toy's closure import and returns its handle.
  pub fn closure(&mut self, kind: ClosureKind) -> Handle {
    let a = self.next_state.get();
    self.next_state.set(a + 1);
    let import = match kind {
      ClosureKind::Mut => CLOSURE_MUT,
      ClosureKind::Shared => CLOSURE_SHARED,
    };
    self
      .call_handle(import, &[a.into(), VTABLE.into(), WasmValue::I32(0)])
      .unwrap()
  }

  /// Drops a closure handle the way compiled guest code does: through `cb_drop`, running the
  /// destructor itself when the bridge says the closure was idle.
  pub fn drop_closure(&mut self, handle: Handle) -> Result<bool, BridgeError> {
    let state = self.bridge.heap().resolve(handle).ok().and_then(|value| {
      let closure = value.as_object()?.as_closure()?;
      Some(closure.state_word())
    });
    let must_destroy = self.call(Intrinsic::CbDrop.name(), &[handle.into()])?;
    if must_destroy != Some(WasmValue::I32(1)) {
      return Ok(false);
    }
    if let Some(a) = state {
      self.bridge.call_guest(self.dtor, &[a.into(), VTABLE.into()])?;
    }
    Ok(true)
  }

  pub fn value(&self, handle: Handle) -> glue_js::HostValue {
    self.bridge.heap().resolve(handle).unwrap().clone()
  }

  pub fn destroyed(&self) -> Vec<(u32, u32)> {
    self.journal.borrow().destroyed.clone()
  }

  pub fn invocations(&self) -> usize {
    self.journal.borrow().invoked.len()
  }
}
