use crate::console::{Console, Level};
use crate::event_loop::EventLoop;
use crate::promise;
use glue_js::{
  ArgRule, BridgeError, CallDescriptor, HostImports, HostObject, HostValue, JsString,
  RetRule,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Import names the web host answers to.
pub mod names {
  pub const WINDOW: &str = "__wbg_window";
  pub const INSTANCEOF_WINDOW: &str = "__wbg_instanceof_Window";
  pub const DOCUMENT: &str = "__wbg_document";
  pub const GET_ELEMENT_BY_ID: &str = "__wbg_getElementById";
  pub const INSTANCEOF_CANVAS: &str = "__wbg_instanceof_HtmlCanvasElement";
  pub const WIDTH: &str = "__wbg_width";
  pub const HEIGHT: &str = "__wbg_height";
  pub const SET_WIDTH: &str = "__wbg_setwidth";
  pub const SET_HEIGHT: &str = "__wbg_setheight";
  pub const LOCAL_STORAGE: &str = "__wbg_localStorage";
  pub const GET_ITEM: &str = "__wbg_getItem";
  pub const SET_ITEM: &str = "__wbg_setItem";
  pub const REMOVE_ITEM: &str = "__wbg_removeItem";
  pub const LOG: &str = "__wbg_log";
  pub const WARN: &str = "__wbg_warn";
  pub const ERROR: &str = "__wbg_error";
  pub const NAVIGATOR: &str = "__wbg_navigator";
  pub const CLIPBOARD: &str = "__wbg_clipboard";
  pub const WRITE_TEXT: &str = "__wbg_writeText";
  pub const SET_TIMEOUT: &str = "__wbg_setTimeout";
  pub const CLEAR_TIMEOUT: &str = "__wbg_clearTimeout";
  pub const SET_INTERVAL: &str = "__wbg_setInterval";
  pub const CLEAR_INTERVAL: &str = "__wbg_clearInterval";
  pub const REQUEST_ANIMATION_FRAME: &str = "__wbg_requestAnimationFrame";
  pub const CANCEL_ANIMATION_FRAME: &str = "__wbg_cancelAnimationFrame";
  pub const QUEUE_MICROTASK: &str = "__wbg_queueMicrotask";
  pub const PERFORMANCE: &str = "__wbg_performance";
  pub const NOW: &str = "__wbg_now";
  pub const RESOLVE: &str = "__wbg_resolve";
  pub const THEN: &str = "__wbg_then";
  pub const DATE_NEW: &str = "__wbg_new0";
  pub const GET_TIME: &str = "__wbg_getTime";
  pub const GET_HOURS: &str = "__wbg_getHours";
  pub const GET_MINUTES: &str = "__wbg_getMinutes";
  pub const GET_SECONDS: &str = "__wbg_getSeconds";
  pub const GET_MILLISECONDS: &str = "__wbg_getMilliseconds";
  pub const LOCATION: &str = "__wbg_location";
  pub const HASH: &str = "__wbg_hash";
  pub const CALL0: &str = "__wbg_call0";
  pub const CALL1: &str = "__wbg_call1";
}

/// Which browser capabilities the simulated page offers, and its initial state.
///
/// Missing capabilities are not registered at all, so a guest that links them gets
/// [`BridgeError::Unsupported`] when it calls them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebConfig {
  pub clipboard: bool,
  pub local_storage: bool,
  /// Upper bound on the UTF-8 bytes of all stored keys and values.
  pub storage_quota_bytes: usize,
  pub canvas_id: String,
  pub canvas_width: u32,
  pub canvas_height: u32,
  pub location_hash: String,
  /// Wall-clock time, in milliseconds since the Unix epoch, at virtual time zero.
  pub epoch_ms: f64,
}

impl Default for WebConfig {
  fn default() -> Self {
    Self {
      clipboard: true,
      local_storage: true,
      storage_quota_bytes: 5 * 1024 * 1024,
      canvas_id: "canvas".to_string(),
      canvas_width: 300,
      canvas_height: 150,
      location_hash: String::new(),
      epoch_ms: 0.0,
    }
  }
}

impl WebConfig {
  pub fn from_json(json: &str) -> Result<Self, BridgeError> {
    serde_json::from_str(json).map_err(|err| BridgeError::InvalidOptions(err.to_string()))
  }
}

struct Window;
struct Document;
struct Canvas {
  width: u32,
  height: u32,
}
struct Storage;
struct Navigator;
struct Clipboard;
struct Performance;
struct Location;
struct Date {
  ms: f64,
}

#[derive(Default)]
struct PageState {
  /// Insertion-ordered like the browser's storage area.
  storage: Vec<(String, String)>,
  clipboard: Option<String>,
  hash: String,
}

impl PageState {
  fn storage_bytes_with(&self, key: &str, value: &str) -> usize {
    let others: usize = self
      .storage
      .iter()
      .filter(|(k, _)| k != key)
      .map(|(k, v)| k.len() + v.len())
      .sum();
    others + key.len() + value.len()
  }
}

/// The page's singleton objects. Every getter hands out the same object.
struct Globals {
  window: HostObject,
  document: HostObject,
  canvas: HostObject,
  storage: HostObject,
  navigator: HostObject,
  clipboard: HostObject,
  performance: HostObject,
  location: HostObject,
}

/// A simulated browser page that registers its APIs as bridge imports.
pub struct WebHost {
  config: WebConfig,
  console: Console,
  event_loop: EventLoop,
  state: Rc<RefCell<PageState>>,
  globals: Rc<Globals>,
}

fn exception(name: &str, message: &str) -> BridgeError {
  BridgeError::Throw(HostValue::Object(HostObject::error(name, message)))
}

/// The receiver, if it is a `T`; otherwise the browser's "Illegal invocation" TypeError.
fn this<T: Any>(args: &[HostValue], interface: &str) -> Result<HostObject, BridgeError> {
  match args.first().and_then(HostValue::as_object) {
    Some(object) if object.is_native::<T>() => Ok(object.clone()),
    _ => Err(exception(
      "TypeError",
      &format!("Illegal invocation: receiver is not a {interface}"),
    )),
  }
}

fn text(args: &[HostValue], index: usize) -> String {
  args
    .get(index)
    .and_then(HostValue::as_string)
    .map(JsString::to_string_lossy)
    .unwrap_or_default()
}

fn number(args: &[HostValue], index: usize) -> f64 {
  args.get(index).and_then(HostValue::as_number).unwrap_or(0.0)
}

fn callback(args: &[HostValue], index: usize) -> Result<HostValue, BridgeError> {
  match args.get(index) {
    Some(value) if value.is_function() => Ok(value.clone()),
    _ => Err(exception("TypeError", "callback is not a function")),
  }
}

fn is<T: Any>(args: &[HostValue]) -> HostValue {
  HostValue::Bool(args.first().and_then(HostValue::as_object).is_some_and(HostObject::is_native::<T>))
}

fn date_field(args: &[HostValue], unit_ms: f64, modulo: f64) -> Result<HostValue, BridgeError> {
  let date = this::<Date>(args, "Date")?;
  let ms = date.with_native(|date: &Date| date.ms).unwrap_or(f64::NAN);
  Ok(HostValue::Number((ms / unit_ms).floor().rem_euclid(modulo)))
}

const HANDLE: &[ArgRule] = &[ArgRule::Handle];

impl WebHost {
  pub fn new(config: WebConfig) -> Self {
    let console = Console::new();
    let event_loop = EventLoop::new(console.clone());
    let globals = Globals {
      window: HostObject::native("Window", Window),
      document: HostObject::native("Document", Document),
      canvas: HostObject::native(
        "HTMLCanvasElement",
        Canvas {
          width: config.canvas_width,
          height: config.canvas_height,
        },
      ),
      storage: HostObject::native("Storage", Storage),
      navigator: HostObject::native("Navigator", Navigator),
      clipboard: HostObject::native("Clipboard", Clipboard),
      performance: HostObject::native("Performance", Performance),
      location: HostObject::native("Location", Location),
    };
    let state = PageState {
      hash: config.location_hash.clone(),
      ..PageState::default()
    };
    Self {
      config,
      console,
      event_loop,
      state: Rc::new(RefCell::new(state)),
      globals: Rc::new(globals),
    }
  }

  pub fn config(&self) -> &WebConfig {
    &self.config
  }

  pub fn console(&self) -> &Console {
    &self.console
  }

  pub fn event_loop(&self) -> &EventLoop {
    &self.event_loop
  }

  pub fn window(&self) -> HostObject {
    self.globals.window.clone()
  }

  pub fn canvas_size(&self) -> (u32, u32) {
    self
      .globals
      .canvas
      .with_native(|canvas: &Canvas| (canvas.width, canvas.height))
      .unwrap_or_default()
  }

  pub fn clipboard_text(&self) -> Option<String> {
    self.state.borrow().clipboard.clone()
  }

  pub fn storage_item(&self, key: &str) -> Option<String> {
    self
      .state
      .borrow()
      .storage
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.clone())
  }

  pub fn set_location_hash(&self, hash: &str) {
    self.state.borrow_mut().hash = hash.to_string();
  }

  /// Builds the import registry for one bridge.
  pub fn imports(&self) -> HostImports {
    let mut host = HostImports::new();
    self.register_page(&mut host);
    self.register_canvas(&mut host);
    if self.config.local_storage {
      self.register_storage(&mut host);
    }
    self.register_console(&mut host);
    if self.config.clipboard {
      self.register_clipboard(&mut host);
    } else {
      tracing::debug!(target: "glue_js_web::host", "clipboard unavailable");
    }
    self.register_timers(&mut host);
    self.register_promises(&mut host);
    self.register_date(&mut host);
    register_call(&mut host);
    host
  }

  fn register_page(&self, host: &mut HostImports) {
    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::WINDOW, &[], RetRule::OptionalHandle),
      move |_, _| Ok(HostValue::Object(globals.window.clone())),
    );
    host.register(
      CallDescriptor::new(names::INSTANCEOF_WINDOW, HANDLE, RetRule::Bool),
      |_, args| Ok(is::<Window>(args)),
    );

    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::DOCUMENT, HANDLE, RetRule::OptionalHandle),
      move |_, args| {
        this::<Window>(args, "Window")?;
        Ok(HostValue::Object(globals.document.clone()))
      },
    );

    let globals = self.globals.clone();
    let canvas_id = self.config.canvas_id.clone();
    host.register(
      CallDescriptor::new(
        names::GET_ELEMENT_BY_ID,
        &[ArgRule::Handle, ArgRule::Str],
        RetRule::OptionalHandle,
      ),
      move |_, args| {
        this::<Document>(args, "Document")?;
        Ok(if text(args, 1) == canvas_id {
          HostValue::Object(globals.canvas.clone())
        } else {
          HostValue::Null
        })
      },
    );

    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::NAVIGATOR, HANDLE, RetRule::Handle),
      move |_, args| {
        this::<Window>(args, "Window")?;
        Ok(HostValue::Object(globals.navigator.clone()))
      },
    );

    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::PERFORMANCE, HANDLE, RetRule::OptionalHandle),
      move |_, args| {
        this::<Window>(args, "Window")?;
        Ok(HostValue::Object(globals.performance.clone()))
      },
    );
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::NOW, HANDLE, RetRule::F64),
      move |_, args| {
        this::<Performance>(args, "Performance")?;
        Ok(HostValue::Number(event_loop.now()))
      },
    );

    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::LOCATION, HANDLE, RetRule::Handle),
      move |_, args| {
        this::<Window>(args, "Window")?;
        Ok(HostValue::Object(globals.location.clone()))
      },
    );
    let state = self.state.clone();
    host.register(
      CallDescriptor::new(names::HASH, HANDLE, RetRule::StringOut).fallible(),
      move |_, args| {
        this::<Location>(args, "Location")?;
        Ok(HostValue::string(&state.borrow().hash))
      },
    );
  }

  fn register_canvas(&self, host: &mut HostImports) {
    host.register(
      CallDescriptor::new(names::INSTANCEOF_CANVAS, HANDLE, RetRule::Bool),
      |_, args| Ok(is::<Canvas>(args)),
    );
    host.register(
      CallDescriptor::new(names::WIDTH, HANDLE, RetRule::U32),
      |_, args| {
        let canvas = this::<Canvas>(args, "HTMLCanvasElement")?;
        let width = canvas.with_native(|c: &Canvas| c.width).unwrap_or(0);
        Ok(HostValue::Number(width as f64))
      },
    );
    host.register(
      CallDescriptor::new(names::HEIGHT, HANDLE, RetRule::U32),
      |_, args| {
        let canvas = this::<Canvas>(args, "HTMLCanvasElement")?;
        let height = canvas.with_native(|c: &Canvas| c.height).unwrap_or(0);
        Ok(HostValue::Number(height as f64))
      },
    );
    host.register(
      CallDescriptor::new(names::SET_WIDTH, &[ArgRule::Handle, ArgRule::U32], RetRule::Unit),
      |_, args| {
        let canvas = this::<Canvas>(args, "HTMLCanvasElement")?;
        let width = number(args, 1) as u32;
        canvas.with_native_mut(|c: &mut Canvas| c.width = width);
        Ok(HostValue::Undefined)
      },
    );
    host.register(
      CallDescriptor::new(names::SET_HEIGHT, &[ArgRule::Handle, ArgRule::U32], RetRule::Unit),
      |_, args| {
        let canvas = this::<Canvas>(args, "HTMLCanvasElement")?;
        let height = number(args, 1) as u32;
        canvas.with_native_mut(|c: &mut Canvas| c.height = height);
        Ok(HostValue::Undefined)
      },
    );
  }

  fn register_storage(&self, host: &mut HostImports) {
    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::LOCAL_STORAGE, HANDLE, RetRule::OptionalHandle).fallible(),
      move |_, args| {
        this::<Window>(args, "Window")?;
        Ok(HostValue::Object(globals.storage.clone()))
      },
    );

    let state = self.state.clone();
    host.register(
      CallDescriptor::new(
        names::GET_ITEM,
        &[ArgRule::Handle, ArgRule::Str],
        RetRule::OptionalStringOut,
      )
      .fallible(),
      move |_, args| {
        this::<Storage>(args, "Storage")?;
        let key = text(args, 1);
        let state = state.borrow();
        Ok(
          state
            .storage
            .iter()
            .find(|(k, _)| *k == key)
            .map_or(HostValue::Null, |(_, v)| HostValue::string(v)),
        )
      },
    );

    let state = self.state.clone();
    let quota = self.config.storage_quota_bytes;
    host.register(
      CallDescriptor::new(
        names::SET_ITEM,
        &[ArgRule::Handle, ArgRule::Str, ArgRule::Str],
        RetRule::Unit,
      )
      .fallible(),
      move |_, args| {
        this::<Storage>(args, "Storage")?;
        let (key, value) = (text(args, 1), text(args, 2));
        let mut state = state.borrow_mut();
        let needed = state.storage_bytes_with(&key, &value);
        if needed > quota {
          tracing::debug!(target: "glue_js_web::host", needed, quota, "storage quota exceeded");
          return Err(exception(
            "QuotaExceededError",
            &format!("Setting the value of '{key}' exceeded the quota."),
          ));
        }
        match state.storage.iter().position(|(k, _)| *k == key) {
          Some(index) => state.storage[index].1 = value,
          None => state.storage.push((key, value)),
        }
        Ok(HostValue::Undefined)
      },
    );

    let state = self.state.clone();
    host.register(
      CallDescriptor::new(names::REMOVE_ITEM, &[ArgRule::Handle, ArgRule::Str], RetRule::Unit)
        .fallible(),
      move |_, args| {
        this::<Storage>(args, "Storage")?;
        let key = text(args, 1);
        state.borrow_mut().storage.retain(|(k, _)| *k != key);
        Ok(HostValue::Undefined)
      },
    );
  }

  fn register_console(&self, host: &mut HostImports) {
    for (name, level) in [
      (names::LOG, Level::Log),
      (names::WARN, Level::Warn),
      (names::ERROR, Level::Error),
    ] {
      let console = self.console.clone();
      host.register(
        CallDescriptor::new(name, HANDLE, RetRule::Unit),
        move |_, args| {
          console.print(level, args.first().unwrap_or(&HostValue::Undefined));
          Ok(HostValue::Undefined)
        },
      );
    }
  }

  fn register_clipboard(&self, host: &mut HostImports) {
    let globals = self.globals.clone();
    host.register(
      CallDescriptor::new(names::CLIPBOARD, HANDLE, RetRule::Handle),
      move |_, args| {
        this::<Navigator>(args, "Navigator")?;
        Ok(HostValue::Object(globals.clipboard.clone()))
      },
    );

    let state = self.state.clone();
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::WRITE_TEXT, &[ArgRule::Handle, ArgRule::Str], RetRule::Handle),
      move |_, args| {
        this::<Clipboard>(args, "Clipboard")?;
        state.borrow_mut().clipboard = Some(text(args, 1));
        let done = promise::new_promise();
        promise::resolve(&event_loop, &done, HostValue::Undefined);
        Ok(HostValue::Object(done))
      },
    );
  }

  fn register_timers(&self, host: &mut HostImports) {
    const SCHEDULE: &[ArgRule] = &[ArgRule::Handle, ArgRule::Handle, ArgRule::I32];
    const CANCEL: &[ArgRule] = &[ArgRule::Handle, ArgRule::I32];

    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::SET_TIMEOUT, SCHEDULE, RetRule::I32).fallible(),
      move |_, args| {
        this::<Window>(args, "Window")?;
        let id = event_loop.set_timeout(callback(args, 1)?, number(args, 2));
        Ok(HostValue::Number(id as f64))
      },
    );
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::SET_INTERVAL, SCHEDULE, RetRule::I32).fallible(),
      move |_, args| {
        this::<Window>(args, "Window")?;
        let id = event_loop.set_interval(callback(args, 1)?, number(args, 2));
        Ok(HostValue::Number(id as f64))
      },
    );
    for name in [names::CLEAR_TIMEOUT, names::CLEAR_INTERVAL] {
      let event_loop = self.event_loop.clone();
      host.register(
        CallDescriptor::new(name, CANCEL, RetRule::Unit),
        move |_, args| {
          this::<Window>(args, "Window")?;
          event_loop.clear_timer(number(args, 1) as i32);
          Ok(HostValue::Undefined)
        },
      );
    }

    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(
        names::REQUEST_ANIMATION_FRAME,
        &[ArgRule::Handle, ArgRule::Handle],
        RetRule::I32,
      )
      .fallible(),
      move |_, args| {
        this::<Window>(args, "Window")?;
        let id = event_loop.request_animation_frame(callback(args, 1)?);
        Ok(HostValue::Number(id as f64))
      },
    );
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::CANCEL_ANIMATION_FRAME, CANCEL, RetRule::Unit).fallible(),
      move |_, args| {
        this::<Window>(args, "Window")?;
        event_loop.cancel_animation_frame(number(args, 1) as i32);
        Ok(HostValue::Undefined)
      },
    );
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(
        names::QUEUE_MICROTASK,
        &[ArgRule::Handle, ArgRule::Handle],
        RetRule::Unit,
      ),
      move |_, args| {
        this::<Window>(args, "Window")?;
        event_loop.queue_microtask(callback(args, 1)?);
        Ok(HostValue::Undefined)
      },
    );
  }

  fn register_promises(&self, host: &mut HostImports) {
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::RESOLVE, HANDLE, RetRule::Handle),
      move |_, args| {
        let value = args.first().cloned().unwrap_or_default();
        Ok(HostValue::Object(promise::resolved(&event_loop, value)))
      },
    );
    let event_loop = self.event_loop.clone();
    host.register(
      CallDescriptor::new(names::THEN, &[ArgRule::Handle, ArgRule::Handle], RetRule::Handle),
      move |_, args| {
        let receiver = args.first().filter(|value| promise::is_promise(value));
        let Some(HostValue::Object(receiver)) = receiver else {
          return Err(exception("TypeError", "receiver is not a Promise"));
        };
        let handler = args.get(1).filter(|value| value.is_function()).cloned();
        Ok(HostValue::Object(promise::then(&event_loop, receiver, handler)))
      },
    );
  }

  fn register_date(&self, host: &mut HostImports) {
    let event_loop = self.event_loop.clone();
    let epoch = self.config.epoch_ms;
    host.register(
      CallDescriptor::new(names::DATE_NEW, &[], RetRule::Handle),
      move |_, _| {
        let ms = epoch + event_loop.now();
        Ok(HostValue::Object(HostObject::native("Date", Date { ms })))
      },
    );
    host.register(
      CallDescriptor::new(names::GET_TIME, HANDLE, RetRule::F64),
      |_, args| {
        let date = this::<Date>(args, "Date")?;
        Ok(HostValue::Number(date.with_native(|date: &Date| date.ms).unwrap_or(f64::NAN)))
      },
    );
    for (name, unit_ms, modulo) in [
      (names::GET_HOURS, 3_600_000.0, 24.0),
      (names::GET_MINUTES, 60_000.0, 60.0),
      (names::GET_SECONDS, 1_000.0, 60.0),
      (names::GET_MILLISECONDS, 1.0, 1_000.0),
    ] {
      host.register(
        CallDescriptor::new(name, HANDLE, RetRule::F64),
        move |_, args| date_field(args, unit_ms, modulo),
      );
    }
  }
}

/// `Function.prototype.call` with zero or one argument. The receiver is ignored.
fn register_call(host: &mut HostImports) {
  host.register(
    CallDescriptor::new(names::CALL0, &[ArgRule::Handle, ArgRule::Handle], RetRule::Handle)
      .fallible(),
    |bridge, args| bridge.call_function(&args[0], &[]),
  );
  host.register(
    CallDescriptor::new(
      names::CALL1,
      &[ArgRule::Handle, ArgRule::Handle, ArgRule::Handle],
      RetRule::Handle,
    )
    .fallible(),
    |bridge, args| bridge.call_function(&args[0], &args[2..3]),
  );
}
