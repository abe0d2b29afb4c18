//! Imports the bridge answers itself, independent of any host environment.

use crate::bridge::Bridge;
use crate::dispatch::{ArgRule, CallDescriptor, RetRule};
use crate::error::BridgeError;
use crate::value::{HostObject, HostValue, JsString, ObjectKind};
use serde_json::{Map, Value as Json};

/// Nesting beyond this is treated like a cycle when rendering objects as JSON.
const MAX_JSON_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
  ObjectDropRef,
  ObjectCloneRef,
  StringNew,
  StringGet,
  NumberNew,
  NumberGet,
  BooleanGet,
  IsUndefined,
  IsNull,
  IsObject,
  IsFunction,
  IsString,
  JsvalEq,
  DebugString,
  Throw,
  Rethrow,
  Memory,
  ExnTake,
  CbDrop,
}

const HANDLE: &[ArgRule] = &[ArgRule::Handle];

const INTRINSICS: &[(Intrinsic, CallDescriptor)] = &[
  (
    Intrinsic::ObjectDropRef,
    CallDescriptor::new("__wbindgen_object_drop_ref", &[ArgRule::TakeHandle], RetRule::Unit),
  ),
  (
    Intrinsic::ObjectCloneRef,
    CallDescriptor::new("__wbindgen_object_clone_ref", HANDLE, RetRule::Handle),
  ),
  (
    Intrinsic::StringNew,
    CallDescriptor::new("__wbindgen_string_new", &[ArgRule::Str], RetRule::Handle),
  ),
  (
    Intrinsic::StringGet,
    CallDescriptor::new("__wbindgen_string_get", HANDLE, RetRule::OptionalStringOut),
  ),
  (
    Intrinsic::NumberNew,
    CallDescriptor::new("__wbindgen_number_new", &[ArgRule::F64], RetRule::Handle),
  ),
  (
    Intrinsic::NumberGet,
    CallDescriptor::new("__wbindgen_number_get", HANDLE, RetRule::OptionalF64Out),
  ),
  (
    Intrinsic::BooleanGet,
    CallDescriptor::new("__wbindgen_boolean_get", HANDLE, RetRule::BoolOrAbsent),
  ),
  (
    Intrinsic::IsUndefined,
    CallDescriptor::new("__wbindgen_is_undefined", HANDLE, RetRule::Bool),
  ),
  (
    Intrinsic::IsNull,
    CallDescriptor::new("__wbindgen_is_null", HANDLE, RetRule::Bool),
  ),
  (
    Intrinsic::IsObject,
    CallDescriptor::new("__wbindgen_is_object", HANDLE, RetRule::Bool),
  ),
  (
    Intrinsic::IsFunction,
    CallDescriptor::new("__wbindgen_is_function", HANDLE, RetRule::Bool),
  ),
  (
    Intrinsic::IsString,
    CallDescriptor::new("__wbindgen_is_string", HANDLE, RetRule::Bool),
  ),
  (
    Intrinsic::JsvalEq,
    CallDescriptor::new(
      "__wbindgen_jsval_eq",
      &[ArgRule::Handle, ArgRule::Handle],
      RetRule::Bool,
    ),
  ),
  (
    Intrinsic::DebugString,
    CallDescriptor::new("__wbindgen_debug_string", HANDLE, RetRule::StringOut),
  ),
  (
    Intrinsic::Throw,
    CallDescriptor::new("__wbindgen_throw", &[ArgRule::Str], RetRule::Unit),
  ),
  (
    Intrinsic::Rethrow,
    CallDescriptor::new("__wbindgen_rethrow", &[ArgRule::TakeHandle], RetRule::Unit),
  ),
  (
    Intrinsic::Memory,
    CallDescriptor::new("__wbindgen_memory", &[], RetRule::Handle),
  ),
  (
    Intrinsic::ExnTake,
    CallDescriptor::new("__wbindgen_exn_take", &[], RetRule::U32),
  ),
  (
    Intrinsic::CbDrop,
    CallDescriptor::new("__wbindgen_cb_drop", &[ArgRule::TakeHandle], RetRule::Bool),
  ),
];

impl Intrinsic {
  pub fn from_name(name: &str) -> Option<Self> {
    INTRINSICS
      .iter()
      .find(|(_, descriptor)| descriptor.name == name)
      .map(|(intrinsic, _)| *intrinsic)
  }

  pub fn descriptor(self) -> CallDescriptor {
    // INTRINSICS is laid out in declaration order.
    let (intrinsic, descriptor) = INTRINSICS[self as usize];
    debug_assert_eq!(intrinsic, self);
    descriptor
  }

  pub fn name(self) -> &'static str {
    self.descriptor().name
  }

  pub fn all() -> impl Iterator<Item = Intrinsic> {
    INTRINSICS.iter().map(|(intrinsic, _)| *intrinsic)
  }
}

pub(crate) fn run(
  bridge: &mut Bridge,
  intrinsic: Intrinsic,
  args: &[HostValue],
) -> Result<HostValue, BridgeError> {
  let arg = |index: usize| args.get(index).cloned().unwrap_or_default();
  Ok(match intrinsic {
    // The handle was consumed while lifting the argument.
    Intrinsic::ObjectDropRef => HostValue::Undefined,
    // Lowered through `RetRule::Handle`, which allocates the second handle.
    Intrinsic::ObjectCloneRef | Intrinsic::StringNew | Intrinsic::NumberNew => arg(0),
    Intrinsic::StringGet => match arg(0) {
      value @ HostValue::String(_) => value,
      _ => HostValue::Undefined,
    },
    Intrinsic::NumberGet => match arg(0) {
      value @ HostValue::Number(_) => value,
      _ => HostValue::Undefined,
    },
    Intrinsic::BooleanGet => arg(0),
    Intrinsic::IsUndefined => HostValue::Bool(arg(0).is_undefined()),
    Intrinsic::IsNull => HostValue::Bool(arg(0).is_null()),
    Intrinsic::IsObject => HostValue::Bool(arg(0).is_object()),
    Intrinsic::IsFunction => HostValue::Bool(arg(0).is_function()),
    Intrinsic::IsString => HostValue::Bool(arg(0).as_string().is_some()),
    Intrinsic::JsvalEq => HostValue::Bool(arg(0).strict_equals(&arg(1))),
    Intrinsic::DebugString => HostValue::String(JsString::from(debug_string(&arg(0)))),
    Intrinsic::Throw => {
      let message = arg(0).as_string().map(JsString::to_string_lossy).unwrap_or_default();
      return Err(BridgeError::Throw(HostValue::Object(HostObject::error(
        "Error", &message,
      ))));
    }
    Intrinsic::Rethrow => return Err(BridgeError::Throw(arg(0))),
    Intrinsic::Memory => HostValue::Object(bridge.memory_object()),
    Intrinsic::ExnTake => {
      let taken = bridge.take_exception();
      HostValue::Number(taken.map_or(0, |handle| handle.index()) as f64)
    }
    Intrinsic::CbDrop => HostValue::Bool(bridge.release_closure(&arg(0))?),
  })
}

/// Renders any host value for diagnostics.
///
/// Plain objects are shown as `Object(<json>)`, falling back to `Object` when they cannot be
/// serialized; errors as `name: message` followed by the stack.
pub fn debug_string(value: &HostValue) -> String {
  debug_string_at(value, 0)
}

fn debug_string_at(value: &HostValue, depth: usize) -> String {
  match value {
    HostValue::Undefined => "undefined".to_string(),
    HostValue::Null => "null".to_string(),
    HostValue::Bool(b) => b.to_string(),
    HostValue::Number(n) => number_to_string(*n),
    HostValue::String(s) => format!("{:?}", s.to_string_lossy()),
    HostValue::Object(object) => match object.kind() {
      ObjectKind::Function(f) if !f.name().is_empty() => format!("Function({})", f.name()),
      ObjectKind::Function(_) | ObjectKind::Closure(_) => "Function".to_string(),
      ObjectKind::Array(_) if depth >= MAX_JSON_DEPTH => "[...]".to_string(),
      ObjectKind::Array(items) => {
        let items: Vec<String> = items
          .borrow()
          .iter()
          .map(|item| debug_string_at(item, depth + 1))
          .collect();
        format!("[{}]", items.join(", "))
      }
      ObjectKind::Plain(_) => match to_json(value, 0) {
        Ok(Some(json)) => format!("Object({json})"),
        _ => "Object".to_string(),
      },
      ObjectKind::Error(e) => format!("{}: {}\n{}", e.name, e.message, e.stack),
      _ => object.class().to_string(),
    },
  }
}

fn number_to_string(n: f64) -> String {
  if n.is_nan() {
    "NaN".to_string()
  } else if n.is_infinite() {
    (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
  } else if n == 0.0 {
    "0".to_string()
  } else if n.fract() == 0.0 && n.abs() < 1e21 {
    format!("{n:.0}")
  } else {
    n.to_string()
  }
}

/// `Err` when the value cannot be serialized; `Ok(None)` for values JSON omits.
fn to_json(value: &HostValue, depth: usize) -> Result<Option<Json>, ()> {
  if depth > MAX_JSON_DEPTH {
    return Err(());
  }
  Ok(Some(match value {
    HostValue::Undefined => return Ok(None),
    HostValue::Null => Json::Null,
    HostValue::Bool(b) => Json::Bool(*b),
    HostValue::Number(n) => json_number(*n),
    HostValue::String(s) => Json::String(s.to_string_lossy()),
    HostValue::Object(object) => match object.kind() {
      ObjectKind::Function(_) | ObjectKind::Closure(_) => return Ok(None),
      ObjectKind::Array(items) => Json::Array(
        items
          .borrow()
          .iter()
          .map(|item| to_json(item, depth + 1).map(|v| v.unwrap_or(Json::Null)))
          .collect::<Result<_, _>>()?,
      ),
      ObjectKind::Plain(props) => {
        let mut map = Map::new();
        for (key, item) in props.borrow().iter() {
          if let Some(item) = to_json(item, depth + 1)? {
            map.insert(key.to_string_lossy(), item);
          }
        }
        Json::Object(map)
      }
      _ => Json::Object(Map::new()),
    },
  }))
}

fn json_number(n: f64) -> Json {
  if n.fract() == 0.0 && n.abs() <= 9007199254740991.0 {
    Json::from(n as i64)
  } else {
    serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
  }
}
