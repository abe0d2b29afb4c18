//! Promises as native host objects, settled through the event loop's microtask queue.

use crate::event_loop::{EventLoop, Microtask};
use glue_js::{Bridge, BridgeError, HostObject, HostValue};

/// `Ok` for fulfilment, `Err` for rejection.
pub type Outcome = Result<HostValue, HostValue>;

#[derive(Clone, Debug)]
pub enum PromiseStatus {
  Pending,
  Fulfilled(HostValue),
  Rejected(HostValue),
}

#[derive(Default)]
struct PromiseState {
  /// Set once the promise has been resolved, possibly to another promise it is now following.
  resolved: bool,
  outcome: Option<Outcome>,
  reactions: Vec<Reaction>,
}

/// A pending `then`: the handler to run on fulfilment and the promise `then` returned.
pub(crate) struct Reaction {
  handler: Option<HostValue>,
  derived: HostObject,
}

pub fn new_promise() -> HostObject {
  HostObject::native("Promise", PromiseState::default())
}

pub fn is_promise(value: &HostValue) -> bool {
  value
    .as_object()
    .is_some_and(HostObject::is_native::<PromiseState>)
}

pub fn status(value: &HostValue) -> Option<PromiseStatus> {
  value
    .as_object()?
    .with_native(|state: &PromiseState| match &state.outcome {
      None => PromiseStatus::Pending,
      Some(Ok(value)) => PromiseStatus::Fulfilled(value.clone()),
      Some(Err(reason)) => PromiseStatus::Rejected(reason.clone()),
    })
}

/// `Promise.resolve(value)`: promises pass through, anything else is wrapped.
pub fn resolved(event_loop: &EventLoop, value: HostValue) -> HostObject {
  if let HostValue::Object(object) = &value {
    if object.is_native::<PromiseState>() {
      return object.clone();
    }
  }
  let promise = new_promise();
  resolve(event_loop, &promise, value);
  promise
}

/// Resolves `promise` with `value`, following it if it is itself a promise. Later resolutions
/// are ignored, and resolving a promise with itself rejects it with a `TypeError`.
pub fn resolve(event_loop: &EventLoop, promise: &HostObject, value: HostValue) {
  let first = promise
    .with_native_mut(|state: &mut PromiseState| !std::mem::replace(&mut state.resolved, true))
    .unwrap_or(false);
  if !first {
    return;
  }
  match &value {
    HostValue::Object(inner) if inner.same(promise) => {
      let cycle = HostObject::error("TypeError", "Chaining cycle detected for promise");
      settle(event_loop, promise, Err(HostValue::Object(cycle)));
    }
    HostValue::Object(inner) if inner.is_native::<PromiseState>() => {
      subscribe(
        event_loop,
        inner,
        Reaction {
          handler: None,
          derived: promise.clone(),
        },
      );
    }
    _ => settle(event_loop, promise, Ok(value)),
  }
}

pub fn reject(event_loop: &EventLoop, promise: &HostObject, reason: HostValue) {
  let first = promise
    .with_native_mut(|state: &mut PromiseState| !std::mem::replace(&mut state.resolved, true))
    .unwrap_or(false);
  if first {
    settle(event_loop, promise, Err(reason));
  }
}

/// `promise.then(handler)`. Rejections skip the handler and propagate to the returned promise.
pub fn then(event_loop: &EventLoop, promise: &HostObject, handler: Option<HostValue>) -> HostObject {
  let derived = new_promise();
  subscribe(
    event_loop,
    promise,
    Reaction {
      handler,
      derived: derived.clone(),
    },
  );
  derived
}

fn subscribe(event_loop: &EventLoop, promise: &HostObject, reaction: Reaction) {
  let settled = promise.with_native_mut(|state: &mut PromiseState| match &state.outcome {
    Some(outcome) => Some((outcome.clone(), reaction)),
    None => {
      state.reactions.push(reaction);
      None
    }
  });
  if let Some(Some((outcome, reaction))) = settled {
    event_loop.enqueue(Microtask::Reaction { reaction, outcome });
  }
}

fn settle(event_loop: &EventLoop, promise: &HostObject, outcome: Outcome) {
  let reactions = promise
    .with_native_mut(|state: &mut PromiseState| {
      if state.outcome.is_some() {
        return Vec::new();
      }
      state.outcome = Some(outcome.clone());
      std::mem::take(&mut state.reactions)
    })
    .unwrap_or_default();
  tracing::trace!(
    target: "glue_js_web::event_loop",
    fulfilled = outcome.is_ok(),
    reactions = reactions.len(),
    "promise settled"
  );
  for reaction in reactions {
    event_loop.enqueue(Microtask::Reaction {
      reaction,
      outcome: outcome.clone(),
    });
  }
}

/// Runs one reaction job. A handler that throws rejects the derived promise; a bridge failure is
/// returned to the event loop.
pub(crate) fn react(
  event_loop: &EventLoop,
  bridge: &mut Bridge,
  reaction: Reaction,
  outcome: Outcome,
) -> Result<(), BridgeError> {
  match (reaction.handler, outcome) {
    (Some(handler), Ok(value)) => match bridge.call_function(&handler, &[value]) {
      Ok(result) => resolve(event_loop, &reaction.derived, result),
      Err(BridgeError::Throw(exception)) => reject(event_loop, &reaction.derived, exception),
      Err(err) => return Err(err),
    },
    // Settled outcomes are never promises, and a following promise is already marked resolved.
    (_, outcome) => settle(event_loop, &reaction.derived, outcome),
  }
  Ok(())
}
