mod toy;

use glue_js::{BridgeError, Handle, HostValue, Intrinsic, Violation, WasmValue};
use glue_js_web::{names, promise, Console, EventLoop, Level, WebConfig};
use toy::{error_name, Page, Shape, RETPTR};

#[test]
fn timers_fire_in_due_order() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (late, late_cb) = page.callback(Shape::Unit);
  let (early, early_cb) = page.callback(Shape::Unit);
  page.int(names::SET_TIMEOUT, &[window.into(), late_cb.into(), 10i32.into()]);
  page.int(names::SET_TIMEOUT, &[window.into(), early_cb.into(), 5i32.into()]);

  assert_eq!(page.advance(4.0), 0);
  assert_eq!(page.advance(1.0), 1);
  assert_eq!(page.calls_of(early).len(), 1);
  assert!(page.calls_of(late).is_empty());
  assert_eq!(page.advance(100.0), 1);
  let order: Vec<u32> = page.calls().into_iter().map(|(a, _)| a).collect();
  assert_eq!(order, vec![early, late]);
  assert_eq!(page.web.event_loop().pending_timers(), 0);
  assert_eq!(page.web.event_loop().now(), 105.0);
}

#[test]
fn intervals_repeat_until_cleared() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (tick, tick_cb) = page.callback(Shape::Unit);
  let id = page.int(names::SET_INTERVAL, &[window.into(), tick_cb.into(), 10i32.into()]);

  assert_eq!(page.advance(35.0), 3);
  page
    .call(names::CLEAR_INTERVAL, &[window.into(), id.into()])
    .unwrap();
  assert_eq!(page.advance(100.0), 0);
  assert_eq!(page.calls_of(tick).len(), 3);
}

#[test]
fn zero_interval_is_clamped() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (tick, tick_cb) = page.callback(Shape::Unit);
  page.int(names::SET_INTERVAL, &[window.into(), tick_cb.into(), 0i32.into()]);
  assert_eq!(page.advance(5.0), 5);
  assert_eq!(page.calls_of(tick).len(), 5);
}

#[test]
fn animation_frames_run_once_per_request() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (first, first_cb) = page.callback(Shape::F64);
  let (second, second_cb) = page.callback(Shape::F64);
  page.int(names::REQUEST_ANIMATION_FRAME, &[window.into(), first_cb.into()]);
  let cancelled = page.int(names::REQUEST_ANIMATION_FRAME, &[window.into(), second_cb.into()]);
  page
    .call(names::CANCEL_ANIMATION_FRAME, &[window.into(), cancelled.into()])
    .unwrap();

  assert_eq!(page.frame(16.0), 1);
  assert_eq!(page.calls_of(first), vec!["16".to_string()]);
  assert!(page.calls_of(second).is_empty());
  assert_eq!(page.frame(32.0), 0);
}

#[test]
fn callback_exceptions_go_to_the_console() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (bad, bad_cb) = page.throwing_callback();
  let (good, good_cb) = page.callback(Shape::Unit);
  page.int(names::SET_TIMEOUT, &[window.into(), bad_cb.into(), 1i32.into()]);
  page.int(names::SET_TIMEOUT, &[window.into(), good_cb.into(), 2i32.into()]);

  assert_eq!(page.advance(10.0), 2);
  assert_eq!(page.calls_of(bad).len(), 1);
  assert_eq!(page.calls_of(good).len(), 1);
  assert_eq!(
    page.web.console().messages(Level::Error),
    vec![format!("Uncaught Error: callback {bad} failed")]
  );
  assert!(!page.bridge.is_poisoned());
}

#[test]
fn violation_in_a_timer_stops_the_loop() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (gone, gone_cb) = page.callback(Shape::Unit);
  let (later, later_cb) = page.callback(Shape::Unit);
  page.int(names::SET_TIMEOUT, &[window.into(), gone_cb.into(), 1i32.into()]);
  page.int(names::SET_TIMEOUT, &[window.into(), later_cb.into(), 2i32.into()]);
  assert!(page.drop_callback(gone, gone_cb));

  let err = page.try_advance(10.0).unwrap_err();
  assert!(matches!(err, BridgeError::Violation(Violation::ClosureConsumed)));
  assert!(page.bridge.is_poisoned());
  assert!(page.calls_of(later).is_empty());
  assert_eq!(page.web.event_loop().pending_timers(), 1);
  assert_eq!(page.web.event_loop().now(), 1.0);
  assert!(page.web.console().messages(Level::Error).is_empty());

  let err = page.try_advance(10.0).unwrap_err();
  assert!(matches!(err, BridgeError::Poisoned(Violation::ClosureConsumed)));
  assert!(page.calls_of(later).is_empty());
}

#[test]
fn violation_in_a_microtask_stops_the_drain() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (gone, gone_cb) = page.callback(Shape::Unit);
  let (later, later_cb) = page.callback(Shape::Unit);
  page
    .call(names::QUEUE_MICROTASK, &[window.into(), gone_cb.into()])
    .unwrap();
  page
    .call(names::QUEUE_MICROTASK, &[window.into(), later_cb.into()])
    .unwrap();
  assert!(page.drop_callback(gone, gone_cb));

  let err = page.try_microtasks().unwrap_err();
  assert!(matches!(err, BridgeError::Violation(Violation::ClosureConsumed)));
  assert!(page.calls_of(later).is_empty());
  assert_eq!(page.web.event_loop().pending_microtasks(), 1);
}

#[test]
fn non_callable_timer_callback_is_a_pending_type_error() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let err = page
    .call(names::SET_TIMEOUT, &[window.into(), Handle::NULL.into(), 0i32.into()])
    .unwrap_err();
  assert!(matches!(err, BridgeError::ExceptionPending));
  let exception = page.take_exception();
  assert_eq!(error_name(&exception).as_deref(), Some("TypeError"));
}

#[test]
fn promise_reactions_wait_for_microtasks() {
  let mut page = Page::new(WebConfig::default());
  let answer = page.handle(Intrinsic::NumberNew.name(), &[42.0f64.into()]);
  let resolved = page.handle(names::RESOLVE, &[answer.into()]);
  let (seen, seen_cb) = page.callback(Shape::Value);
  let chained = page.handle(names::THEN, &[resolved.into(), seen_cb.into()]);

  assert!(page.calls_of(seen).is_empty());
  assert_eq!(page.microtasks(), 1);
  assert_eq!(page.calls_of(seen), vec!["42".to_string()]);

  // The handler returned nothing, so the chained promise fulfils with undefined.
  match promise::status(&page.value(chained)) {
    Some(promise::PromiseStatus::Fulfilled(value)) => assert!(value.is_undefined()),
    other => panic!("unexpected status {other:?}"),
  }
}

#[test]
fn promise_resolved_with_itself_rejects() {
  let event_loop = EventLoop::new(Console::new());
  let cyclic = promise::new_promise();
  promise::resolve(&event_loop, &cyclic, HostValue::Object(cyclic.clone()));
  match promise::status(&HostValue::Object(cyclic)) {
    Some(promise::PromiseStatus::Rejected(reason)) => {
      assert_eq!(error_name(&reason).as_deref(), Some("TypeError"));
    }
    other => panic!("unexpected status {other:?}"),
  }
}

#[test]
fn resolve_passes_promises_through() {
  let mut page = Page::new(WebConfig::default());
  let answer = page.handle(Intrinsic::NumberNew.name(), &[1.0f64.into()]);
  let first = page.handle(names::RESOLVE, &[answer.into()]);
  let second = page.handle(names::RESOLVE, &[first.into()]);
  let same = page
    .call(Intrinsic::JsvalEq.name(), &[first.into(), second.into()])
    .unwrap();
  assert_eq!(same, Some(WasmValue::I32(1)));
}

#[test]
fn clipboard_write_resolves_a_promise() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let navigator = page.handle(names::NAVIGATOR, &[window.into()]);
  let clipboard = page.handle(names::CLIPBOARD, &[navigator.into()]);
  let (ptr, len) = page.put_str("copied");
  let written = page.handle(names::WRITE_TEXT, &[clipboard.into(), ptr, len]);
  assert_eq!(page.web.clipboard_text().as_deref(), Some("copied"));

  let (done, done_cb) = page.callback(Shape::Value);
  page.handle(names::THEN, &[written.into(), done_cb.into()]);
  page.microtasks();
  assert_eq!(page.calls_of(done), vec!["undefined".to_string()]);
}

#[test]
fn missing_clipboard_is_unsupported() {
  let config = WebConfig {
    clipboard: false,
    ..WebConfig::default()
  };
  let mut page = Page::new(config);
  let window = page.window();
  let navigator = page.handle(names::NAVIGATOR, &[window.into()]);
  let err = page
    .call(names::CLIPBOARD, &[navigator.into()])
    .unwrap_err();
  assert!(matches!(err, BridgeError::Unsupported { ref import } if import == names::CLIPBOARD));
  assert!(!page.bridge.is_poisoned());
}

#[test]
fn local_storage_round_trip_and_quota() {
  let config = WebConfig {
    storage_quota_bytes: 16,
    ..WebConfig::default()
  };
  let mut page = Page::new(config);
  let window = page.window();
  let storage = page.handle(names::LOCAL_STORAGE, &[window.into()]);

  let (kptr, klen) = page.put_str("theme");
  let (vptr, vlen) = page.put_str("dark");
  page
    .call(names::SET_ITEM, &[storage.into(), kptr, klen, vptr, vlen])
    .unwrap();
  assert_eq!(page.web.storage_item("theme").as_deref(), Some("dark"));

  page
    .call(names::GET_ITEM, &[RETPTR.into(), storage.into(), kptr, klen])
    .unwrap();
  assert_eq!(page.read_out_string(RETPTR).as_deref(), Some("dark"));

  let (mptr, mlen) = page.put_str("missing");
  page
    .call(names::GET_ITEM, &[RETPTR.into(), storage.into(), mptr, mlen])
    .unwrap();
  assert_eq!(page.read_out_string(RETPTR), None);

  let (bptr, blen) = page.put_str("far too long a value");
  let err = page
    .call(names::SET_ITEM, &[storage.into(), kptr, klen, bptr, blen])
    .unwrap_err();
  assert!(matches!(err, BridgeError::ExceptionPending));
  let exception = page.take_exception();
  assert_eq!(error_name(&exception).as_deref(), Some("QuotaExceededError"));
  assert_eq!(page.web.storage_item("theme").as_deref(), Some("dark"));
}

#[test]
fn canvas_lookup_and_resize() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let document = page.handle(names::DOCUMENT, &[window.into()]);

  let (ptr, len) = page.put_str("nope");
  assert_eq!(
    page.handle(names::GET_ELEMENT_BY_ID, &[document.into(), ptr, len]),
    Handle::UNDEFINED
  );

  let (ptr, len) = page.put_str("canvas");
  let canvas = page.handle(names::GET_ELEMENT_BY_ID, &[document.into(), ptr, len]);
  assert_eq!(
    page.call(names::INSTANCEOF_CANVAS, &[canvas.into()]).unwrap(),
    Some(WasmValue::I32(1))
  );
  assert_eq!(
    page.call(names::INSTANCEOF_CANVAS, &[window.into()]).unwrap(),
    Some(WasmValue::I32(0))
  );
  assert_eq!(page.int(names::WIDTH, &[canvas.into()]), 300);
  page
    .call(names::SET_WIDTH, &[canvas.into(), 640u32.into()])
    .unwrap();
  page
    .call(names::SET_HEIGHT, &[canvas.into(), 480u32.into()])
    .unwrap();
  assert_eq!(page.int(names::HEIGHT, &[canvas.into()]), 480);
  assert_eq!(page.web.canvas_size(), (640, 480));
}

#[test]
fn wrong_receiver_throws_illegal_invocation() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let err = page.call(names::WIDTH, &[window.into()]).unwrap_err();
  let BridgeError::Throw(exception) = err else {
    panic!("expected a throw, got {err:?}");
  };
  assert_eq!(error_name(&exception).as_deref(), Some("TypeError"));
}

#[test]
fn clock_drives_performance_and_date() {
  let config = WebConfig {
    // 1970-01-01T10:20:30.000Z
    epoch_ms: 37_230_000.0,
    ..WebConfig::default()
  };
  let mut page = Page::new(config);
  let window = page.window();
  page.advance(1_250.0);

  let performance = page.handle(names::PERFORMANCE, &[window.into()]);
  assert_eq!(
    page.call(names::NOW, &[performance.into()]).unwrap(),
    Some(WasmValue::F64(1_250.0))
  );

  let date = page.handle(names::DATE_NEW, &[]);
  let field = |page: &mut Page, name| {
    page
      .call(name, &[date.into()])
      .unwrap()
      .and_then(WasmValue::as_f64)
      .unwrap()
  };
  assert_eq!(field(&mut page, names::GET_HOURS), 10.0);
  assert_eq!(field(&mut page, names::GET_MINUTES), 20.0);
  assert_eq!(field(&mut page, names::GET_SECONDS), 31.0);
  assert_eq!(field(&mut page, names::GET_MILLISECONDS), 250.0);
  assert_eq!(field(&mut page, names::GET_TIME), 37_231_250.0);
}

#[test]
fn location_hash_out_param() {
  let config = WebConfig {
    location_hash: "#scene=orbit".to_string(),
    ..WebConfig::default()
  };
  let mut page = Page::new(config);
  let window = page.window();
  let location = page.handle(names::LOCATION, &[window.into()]);
  page
    .call(names::HASH, &[RETPTR.into(), location.into()])
    .unwrap();
  assert_eq!(page.read_out_string(RETPTR).as_deref(), Some("#scene=orbit"));

  page.web.set_location_hash("#x");
  page
    .call(names::HASH, &[RETPTR.into(), location.into()])
    .unwrap();
  assert_eq!(page.read_out_string(RETPTR).as_deref(), Some("#x"));
}

#[test]
fn console_prints_strings_verbatim() {
  let mut page = Page::new(WebConfig::default());
  let (ptr, len) = page.put_str("frame time");
  let text = page.handle(Intrinsic::StringNew.name(), &[ptr, len]);
  let number = page.handle(Intrinsic::NumberNew.name(), &[1.5f64.into()]);
  page.call(names::LOG, &[text.into()]).unwrap();
  page.call(names::WARN, &[number.into()]).unwrap();
  page.call(names::ERROR, &[Handle::NULL.into()]).unwrap();

  let console = page.web.console();
  assert_eq!(console.messages(Level::Log), vec!["frame time".to_string()]);
  assert_eq!(console.messages(Level::Warn), vec!["1.5".to_string()]);
  assert_eq!(console.messages(Level::Error), vec!["null".to_string()]);
}

#[test]
fn call0_invokes_callbacks_and_parks_exceptions() {
  let mut page = Page::new(WebConfig::default());
  let (ok, ok_cb) = page.callback(Shape::Unit);
  let result = page.handle(names::CALL0, &[ok_cb.into(), Handle::UNDEFINED.into()]);
  assert!(page.value(result).is_undefined());
  assert_eq!(page.calls_of(ok).len(), 1);

  let (_, bad_cb) = page.throwing_callback();
  let err = page
    .call(names::CALL0, &[bad_cb.into(), Handle::UNDEFINED.into()])
    .unwrap_err();
  assert!(matches!(err, BridgeError::ExceptionPending));
  assert!(matches!(page.take_exception(), HostValue::Object(_)));
}

#[test]
fn call0_surfaces_violations_instead_of_parking_them() {
  let mut page = Page::new(WebConfig::default());
  let window = page.window();
  let (a, cb) = page.callback(Shape::Unit);
  let copy = page.handle(Intrinsic::ObjectCloneRef.name(), &[cb.into()]);
  assert!(page.drop_callback(a, cb));
  assert_eq!(page.destroyed(), vec![a]);

  let err = page
    .call(names::CALL0, &[copy.into(), window.into()])
    .unwrap_err();
  assert!(matches!(err, BridgeError::Violation(Violation::ClosureConsumed)));
  assert!(page.bridge.is_poisoned());
  assert_eq!(page.bridge.pending_exception(), None);
  assert!(page.calls_of(a).is_empty());

  let err = page
    .call(names::CALL0, &[copy.into(), window.into()])
    .unwrap_err();
  assert!(matches!(err, BridgeError::Poisoned(Violation::ClosureConsumed)));
  assert_eq!(page.destroyed(), vec![a]);
}

#[test]
fn config_from_json() {
  let config = WebConfig::from_json(r#"{ "clipboard": false, "canvas_width": 64 }"#).unwrap();
  assert!(!config.clipboard);
  assert!(config.local_storage);
  assert_eq!(config.canvas_width, 64);
  assert!(WebConfig::from_json(r#"{ "camera": true }"#).is_err());
}
