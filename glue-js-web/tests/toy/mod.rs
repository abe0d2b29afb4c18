#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use glue_js::{
  codec, debug_string, Bridge, BridgeError, ClosureKind, GuestAdapter, GuestArg, GuestRet,
  GuestTable, Handle, HostObject, HostValue, ImportDecl, Intrinsic, WasmValue,
};
use glue_js_web::{names, WebConfig, WebHost};

pub const RETPTR: u32 = 16;

const CLOSURE_UNIT: &str = "closure_unit";
const CLOSURE_F64: &str = "closure_f64";
const CLOSURE_VALUE: &str = "closure_value";

const NO_ARGS: &[GuestArg] = &[];
const NUMBER_ARG: &[GuestArg] = &[GuestArg::F64];
const VALUE_ARG: &[GuestArg] = &[GuestArg::Handle];

/// Argument shape of a toy callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
  Unit,
  F64,
  /// Receives one host value by handle.
  Value,
}

#[derive(Default)]
struct Guest {
  /// `(state word, rendered argument)` per callback invocation.
  calls: Vec<(u32, String)>,
  /// State words of callbacks that throw when invoked.
  throwing: Vec<u32>,
  destroyed: Vec<u32>,
}

/// A toy guest module running against a simulated page.
pub struct Page {
  pub web: WebHost,
  pub bridge: Bridge,
  guest: Rc<RefCell<Guest>>,
  dtor: u32,
  next_state: u32,
}

fn word(words: &[WasmValue], index: usize) -> u32 {
  words.get(index).and_then(|w| w.as_u32()).unwrap_or(0)
}

fn adapter(
  guest: &Rc<RefCell<Guest>>,
  render: impl Fn(&mut Bridge, &[WasmValue]) -> Result<String, BridgeError> + 'static,
) -> impl Fn(&mut Bridge, &[WasmValue]) -> Result<Option<WasmValue>, BridgeError> + 'static {
  let guest = guest.clone();
  move |bridge, words| {
    let a = word(words, 0);
    let rendered = render(bridge, &words[2..])?;
    guest.borrow_mut().calls.push((a, rendered));
    if guest.borrow().throwing.contains(&a) {
      return Err(BridgeError::Throw(HostValue::Object(HostObject::error(
        "Error",
        &format!("callback {a} failed"),
      ))));
    }
    Ok(None)
  }
}

impl Page {
  pub fn new(config: WebConfig) -> Self {
    let web = WebHost::new(config);
    let guest = Rc::new(RefCell::new(Guest::default()));
    let mut table = GuestTable::new();

    let log = guest.clone();
    let dtor = table.push(move |_, words| {
      log.borrow_mut().destroyed.push(word(words, 0));
      Ok(None)
    });
    let unit = table.push(adapter(&guest, |_, _| Ok(String::new())));
    let number = table.push(adapter(&guest, |_, rest| {
      Ok(rest.first().and_then(|w| w.as_f64()).map(|n| n.to_string()).unwrap_or_default())
    }));
    let value = table.push(adapter(&guest, |bridge, rest| {
      let handle = rest.first().and_then(|w| w.as_handle()).unwrap_or(Handle::UNDEFINED);
      let value = bridge.heap_mut().take(handle)?;
      Ok(debug_string(&value))
    }));

    let mut bridge = Bridge::with_defaults(web.imports(), table).unwrap();
    let decls = [
      (CLOSURE_UNIT, unit, NO_ARGS),
      (CLOSURE_F64, number, NUMBER_ARG),
      (CLOSURE_VALUE, value, VALUE_ARG),
    ]
    .map(|(name, func, args)| ImportDecl::Closure {
      name,
      dtor,
      adapter: GuestAdapter {
        name,
        func,
        args,
        ret: GuestRet::Unit,
      },
      kind: ClosureKind::Mut,
    });
    bridge.link(&decls).unwrap();

    Self {
      web,
      bridge,
      guest,
      dtor,
      next_state: 100,
    }
  }

  /// Links `name` on first use and calls it.
  pub fn call(
    &mut self,
    name: &'static str,
    words: &[WasmValue],
  ) -> Result<Option<WasmValue>, BridgeError> {
    let id = self.bridge.link(&[ImportDecl::Named(name)])?[0];
    self.bridge.call(id, words)
  }

  pub fn handle(&mut self, name: &'static str, words: &[WasmValue]) -> Handle {
    let word = self.call(name, words).unwrap();
    word.and_then(WasmValue::as_handle).unwrap_or(Handle::UNDEFINED)
  }

  pub fn int(&mut self, name: &'static str, words: &[WasmValue]) -> i32 {
    self
      .call(name, words)
      .unwrap()
      .and_then(WasmValue::as_i32)
      .unwrap()
  }

  pub fn window(&mut self) -> Handle {
    self.handle(names::WINDOW, &[])
  }

  pub fn callback(&mut self, shape: Shape) -> (u32, Handle) {
    let a = self.next_state;
    self.next_state += 1;
    let import = match shape {
      Shape::Unit => CLOSURE_UNIT,
      Shape::F64 => CLOSURE_F64,
      Shape::Value => CLOSURE_VALUE,
    };
    let handle = self.handle(import, &[a.into(), 0u32.into()]);
    (a, handle)
  }

  pub fn throwing_callback(&mut self) -> (u32, Handle) {
    let (a, handle) = self.callback(Shape::Unit);
    self.guest.borrow_mut().throwing.push(a);
    (a, handle)
  }

  /// Releases the guest's reference to callback `a`, running its destructor the way generated
  /// glue does when the bridge reports an immediate teardown.
  pub fn drop_callback(&mut self, a: u32, handle: Handle) -> bool {
    let dropped = self.call(Intrinsic::CbDrop.name(), &[handle.into()]).unwrap();
    let immediate = dropped == Some(WasmValue::I32(1));
    if immediate {
      self.bridge.call_guest(self.dtor, &[a.into(), 0u32.into()]).unwrap();
    }
    immediate
  }

  pub fn destroyed(&self) -> Vec<u32> {
    self.guest.borrow().destroyed.clone()
  }

  pub fn put_str(&mut self, text: &str) -> (WasmValue, WasmValue) {
    let len = text.len() as u32;
    let memory = self.bridge.memory_mut();
    let ptr = memory.malloc(len, 1).unwrap();
    memory.write(ptr, text.as_bytes()).unwrap();
    (ptr.into(), len.into())
  }

  pub fn read_out_string(&mut self, retptr: u32) -> Option<String> {
    let memory = self.bridge.memory_mut();
    let (ptr, len) = codec::read_out_pair(memory, retptr).unwrap();
    if ptr == 0 {
      return None;
    }
    let bytes = memory.read(ptr as u32, len as u32).unwrap();
    Some(String::from_utf8(bytes).unwrap())
  }

  /// Takes the pending exception through the guest's intrinsic.
  pub fn take_exception(&mut self) -> HostValue {
    let handle = self.handle(Intrinsic::ExnTake.name(), &[]);
    self.bridge.heap_mut().take(handle).unwrap()
  }

  pub fn value(&self, handle: Handle) -> HostValue {
    self.bridge.heap().resolve(handle).unwrap().clone()
  }

  pub fn calls(&self) -> Vec<(u32, String)> {
    self.guest.borrow().calls.clone()
  }

  pub fn calls_of(&self, a: u32) -> Vec<String> {
    self
      .guest
      .borrow()
      .calls
      .iter()
      .filter(|(state, _)| *state == a)
      .map(|(_, arg)| arg.clone())
      .collect()
  }

  pub fn try_advance(&mut self, ms: f64) -> Result<usize, BridgeError> {
    let event_loop = self.web.event_loop().clone();
    event_loop.advance(&mut self.bridge, ms)
  }

  pub fn advance(&mut self, ms: f64) -> usize {
    self.try_advance(ms).unwrap()
  }

  pub fn frame(&mut self, timestamp: f64) -> usize {
    let event_loop = self.web.event_loop().clone();
    event_loop.run_animation_frame(&mut self.bridge, timestamp).unwrap()
  }

  pub fn try_microtasks(&mut self) -> Result<usize, BridgeError> {
    let event_loop = self.web.event_loop().clone();
    event_loop.run_microtasks(&mut self.bridge)
  }

  pub fn microtasks(&mut self) -> usize {
    self.try_microtasks().unwrap()
  }
}

pub fn error_name(value: &HostValue) -> Option<String> {
  value
    .as_object()
    .and_then(HostObject::as_error)
    .map(|e| e.name.clone())
}
