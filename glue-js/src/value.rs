use crate::bridge::Bridge;
use crate::closure::ClosureState;
use crate::dispatch::HostOp;
use crate::error::BridgeError;
use crate::memory::LinearMemory;
use crate::view::ByteView;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An immutable host string, stored as UTF-16 code units.
///
/// Lone surrogates are representable; they only become U+FFFD when the string is encoded into
/// guest memory.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct JsString(Rc<[u16]>);

impl JsString {
  pub fn from_code_units(units: impl Into<Rc<[u16]>>) -> Self {
    Self(units.into())
  }

  pub fn code_units(&self) -> &[u16] {
    &self.0
  }

  /// Length in code units.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn is_ascii(&self) -> bool {
    self.0.iter().all(|&unit| unit < 0x80)
  }

  pub fn to_string_lossy(&self) -> String {
    String::from_utf16_lossy(&self.0)
  }
}

impl From<&str> for JsString {
  fn from(value: &str) -> Self {
    Self(value.encode_utf16().collect::<Vec<_>>().into())
  }
}

impl From<String> for JsString {
  fn from(value: String) -> Self {
    Self::from(value.as_str())
  }
}

impl fmt::Debug for JsString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", self.to_string_lossy())
  }
}

impl fmt::Display for JsString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_string_lossy())
  }
}

/// A value living on the host side of the bridge.
#[derive(Clone, Debug, Default)]
pub enum HostValue {
  #[default]
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(JsString),
  Object(HostObject),
}

impl HostValue {
  pub fn string(value: &str) -> Self {
    HostValue::String(JsString::from(value))
  }

  pub fn is_undefined(&self) -> bool {
    matches!(self, HostValue::Undefined)
  }

  pub fn is_null(&self) -> bool {
    matches!(self, HostValue::Null)
  }

  /// `undefined` or `null`.
  pub fn is_like_none(&self) -> bool {
    matches!(self, HostValue::Undefined | HostValue::Null)
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      HostValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      HostValue::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_string(&self) -> Option<&JsString> {
    match self {
      HostValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&HostObject> {
    match self {
      HostValue::Object(o) => Some(o),
      _ => None,
    }
  }

  pub fn is_function(&self) -> bool {
    self.as_object().is_some_and(HostObject::is_callable)
  }

  /// `typeof`-style object test: non-null and not callable.
  pub fn is_object(&self) -> bool {
    self.as_object().is_some_and(|o| !o.is_callable())
  }

  /// Strict equality: identity for objects, IEEE comparison for numbers.
  pub fn strict_equals(&self, other: &HostValue) -> bool {
    match (self, other) {
      (HostValue::Undefined, HostValue::Undefined) | (HostValue::Null, HostValue::Null) => true,
      (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
      (HostValue::Number(a), HostValue::Number(b)) => a == b,
      (HostValue::String(a), HostValue::String(b)) => a == b,
      (HostValue::Object(a), HostValue::Object(b)) => a.same(b),
      _ => false,
    }
  }

  pub fn type_of(&self) -> &'static str {
    match self {
      HostValue::Undefined => "undefined",
      HostValue::Null => "object",
      HostValue::Bool(_) => "boolean",
      HostValue::Number(_) => "number",
      HostValue::String(_) => "string",
      HostValue::Object(o) if o.is_callable() => "function",
      HostValue::Object(_) => "object",
    }
  }
}

impl From<bool> for HostValue {
  fn from(value: bool) -> Self {
    HostValue::Bool(value)
  }
}

impl From<f64> for HostValue {
  fn from(value: f64) -> Self {
    HostValue::Number(value)
  }
}

impl From<&str> for HostValue {
  fn from(value: &str) -> Self {
    HostValue::string(value)
  }
}

impl From<JsString> for HostValue {
  fn from(value: JsString) -> Self {
    HostValue::String(value)
  }
}

impl From<HostObject> for HostValue {
  fn from(value: HostObject) -> Self {
    HostValue::Object(value)
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorData {
  pub name: String,
  pub message: String,
  pub stack: String,
}

/// A callable implemented by the host.
#[derive(Clone)]
pub struct HostFunction {
  name: &'static str,
  op: HostOp,
}

impl HostFunction {
  pub fn new(
    name: &'static str,
    op: impl Fn(&mut Bridge, &[HostValue]) -> Result<HostValue, BridgeError> + 'static,
  ) -> Self {
    Self {
      name,
      op: Rc::new(op),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn op(&self) -> HostOp {
    self.op.clone()
  }
}

pub enum ObjectKind {
  /// Ordered own properties.
  Plain(RefCell<Vec<(JsString, HostValue)>>),
  Array(RefCell<Vec<HostValue>>),
  Error(ErrorData),
  Function(HostFunction),
  /// A guest closure handed to the host.
  Closure(Rc<ClosureState>),
  /// A zero-copy window onto guest memory.
  Bytes(ByteView),
  /// The guest's linear memory itself.
  Memory(LinearMemory),
  /// Host-defined payload (DOM nodes, promises, storage, ...).
  Native(RefCell<Box<dyn Any>>),
}

struct ObjectData {
  class: &'static str,
  kind: ObjectKind,
}

/// A reference-counted host object. Clones share identity.
#[derive(Clone)]
pub struct HostObject(Rc<ObjectData>);

impl HostObject {
  pub fn new(class: &'static str, kind: ObjectKind) -> Self {
    Self(Rc::new(ObjectData { class, kind }))
  }

  pub fn plain() -> Self {
    Self::new("Object", ObjectKind::Plain(RefCell::new(Vec::new())))
  }

  pub fn plain_with<'a>(props: impl IntoIterator<Item = (&'a str, HostValue)>) -> Self {
    let props = props
      .into_iter()
      .map(|(key, value)| (JsString::from(key), value))
      .collect();
    Self::new("Object", ObjectKind::Plain(RefCell::new(props)))
  }

  pub fn array(items: Vec<HostValue>) -> Self {
    Self::new("Array", ObjectKind::Array(RefCell::new(items)))
  }

  pub fn error(name: &str, message: &str) -> Self {
    Self::new(
      "Error",
      ObjectKind::Error(ErrorData {
        name: name.to_string(),
        message: message.to_string(),
        stack: String::new(),
      }),
    )
  }

  pub fn function(
    name: &'static str,
    op: impl Fn(&mut Bridge, &[HostValue]) -> Result<HostValue, BridgeError> + 'static,
  ) -> Self {
    Self::new("Function", ObjectKind::Function(HostFunction::new(name, op)))
  }

  pub fn native<T: Any>(class: &'static str, payload: T) -> Self {
    Self::new(class, ObjectKind::Native(RefCell::new(Box::new(payload))))
  }

  pub(crate) fn closure(state: Rc<ClosureState>) -> Self {
    Self::new("Function", ObjectKind::Closure(state))
  }

  pub fn bytes(view: ByteView) -> Self {
    Self::new("Uint8Array", ObjectKind::Bytes(view))
  }

  pub(crate) fn memory(memory: LinearMemory) -> Self {
    Self::new("Memory", ObjectKind::Memory(memory))
  }

  pub fn class(&self) -> &'static str {
    self.0.class
  }

  pub fn kind(&self) -> &ObjectKind {
    &self.0.kind
  }

  /// Identity comparison.
  pub fn same(&self, other: &HostObject) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  pub fn is_callable(&self) -> bool {
    matches!(self.0.kind, ObjectKind::Function(_) | ObjectKind::Closure(_))
  }

  pub fn get(&self, key: &str) -> Option<HostValue> {
    let ObjectKind::Plain(props) = &self.0.kind else {
      return None;
    };
    let key = JsString::from(key);
    let props = props.borrow();
    props.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
  }

  /// Sets an own property on a plain object. Returns false for other kinds.
  pub fn set(&self, key: &str, value: HostValue) -> bool {
    let ObjectKind::Plain(props) = &self.0.kind else {
      return false;
    };
    let key = JsString::from(key);
    let mut props = props.borrow_mut();
    match props.iter_mut().find(|(k, _)| *k == key) {
      Some((_, slot)) => *slot = value,
      None => props.push((key, value)),
    }
    true
  }

  pub fn as_error(&self) -> Option<&ErrorData> {
    match &self.0.kind {
      ObjectKind::Error(e) => Some(e),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&ByteView> {
    match &self.0.kind {
      ObjectKind::Bytes(view) => Some(view),
      _ => None,
    }
  }

  pub fn as_memory(&self) -> Option<&LinearMemory> {
    match &self.0.kind {
      ObjectKind::Memory(memory) => Some(memory),
      _ => None,
    }
  }

  pub fn as_closure(&self) -> Option<&Rc<ClosureState>> {
    match &self.0.kind {
      ObjectKind::Closure(state) => Some(state),
      _ => None,
    }
  }

  pub fn is_native<T: Any>(&self) -> bool {
    match &self.0.kind {
      ObjectKind::Native(payload) => payload.borrow().is::<T>(),
      _ => false,
    }
  }

  /// Runs `f` on the native payload if it is a `T`.
  ///
  /// The payload stays borrowed for the duration of `f`, so `f` must not re-enter code that
  /// borrows it again.
  pub fn with_native<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
    let ObjectKind::Native(payload) = &self.0.kind else {
      return None;
    };
    let payload = payload.borrow();
    let result = payload.downcast_ref::<T>().map(f);
    result
  }

  pub fn with_native_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    let ObjectKind::Native(payload) = &self.0.kind else {
      return None;
    };
    let mut payload = payload.borrow_mut();
    let result = payload.downcast_mut::<T>().map(f);
    result
  }
}

impl fmt::Debug for HostObject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0.kind {
      ObjectKind::Error(e) => write!(f, "HostObject({}: {})", e.name, e.message),
      ObjectKind::Function(func) => write!(f, "HostObject(Function {})", func.name),
      _ => write!(f, "HostObject({})", self.0.class),
    }
  }
}
