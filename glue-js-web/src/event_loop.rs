//! A single-threaded host event loop on a virtual clock.
//!
//! Nothing runs until the embedder drives the loop: [`EventLoop::advance`] fires due timers,
//! [`EventLoop::run_animation_frame`] runs the frame callbacks registered so far, and every task
//! is followed by a microtask checkpoint. Callback exceptions are printed to the console and never
//! propagate out of the loop. A bridge violation raised by a callback stops the loop and is returned
//! to the embedder; whatever was still queued stays queued.

use crate::console::{Console, Level};
use crate::promise::{self, Outcome, Reaction};
use glue_js::{Bridge, BridgeError, HostObject, HostValue};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Shortest interval a repeating timer may have, in milliseconds.
pub const MIN_INTERVAL_MS: f64 = 1.0;

pub(crate) enum Microtask {
  Callback(HostValue),
  Reaction { reaction: Reaction, outcome: Outcome },
}

struct Timer {
  id: i32,
  due: f64,
  interval: Option<f64>,
  /// Tie-breaker for timers due at the same instant.
  seq: u64,
  callback: HostValue,
}

#[derive(Default)]
struct Queues {
  now: f64,
  next_id: i32,
  next_seq: u64,
  timers: Vec<Timer>,
  frames: Vec<(i32, HostValue)>,
  microtasks: VecDeque<Microtask>,
}

impl Queues {
  fn id(&mut self) -> i32 {
    self.next_id += 1;
    self.next_id
  }

  fn seq(&mut self) -> u64 {
    self.next_seq += 1;
    self.next_seq
  }

  /// Removes or reschedules the earliest timer due by `deadline`.
  fn pop_due(&mut self, deadline: f64) -> Option<(i32, HostValue)> {
    let index = self
      .timers
      .iter()
      .enumerate()
      .filter(|(_, timer)| timer.due <= deadline)
      .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)))
      .map(|(index, _)| index)?;
    let seq = self.seq();
    let timer = &mut self.timers[index];
    let fired = (timer.id, timer.callback.clone());
    let due = timer.due;
    match timer.interval {
      Some(interval) => {
        timer.due += interval;
        timer.seq = seq;
      }
      None => {
        self.timers.swap_remove(index);
      }
    }
    self.now = self.now.max(due);
    Some(fired)
  }
}

/// Clones share the same queues.
#[derive(Clone)]
pub struct EventLoop {
  queues: Rc<RefCell<Queues>>,
  console: Console,
}

impl EventLoop {
  pub fn new(console: Console) -> Self {
    Self {
      queues: Rc::new(RefCell::new(Queues::default())),
      console,
    }
  }

  /// Virtual milliseconds since the loop was created.
  pub fn now(&self) -> f64 {
    self.queues.borrow().now
  }

  pub fn set_timeout(&self, callback: HostValue, delay_ms: f64) -> i32 {
    self.schedule(callback, delay_ms, None)
  }

  pub fn set_interval(&self, callback: HostValue, interval_ms: f64) -> i32 {
    let interval = interval_ms.max(MIN_INTERVAL_MS);
    self.schedule(callback, interval, Some(interval))
  }

  fn schedule(&self, callback: HostValue, delay_ms: f64, interval: Option<f64>) -> i32 {
    let mut queues = self.queues.borrow_mut();
    let id = queues.id();
    let seq = queues.seq();
    let delay = if delay_ms.is_finite() { delay_ms.max(0.0) } else { 0.0 };
    let due = queues.now + delay;
    queues.timers.push(Timer {
      id,
      due,
      interval,
      seq,
      callback,
    });
    tracing::debug!(target: "glue_js_web::event_loop", id, due, ?interval, "timer scheduled");
    id
  }

  /// Cancels a timeout or interval. Unknown ids are ignored.
  pub fn clear_timer(&self, id: i32) -> bool {
    let mut queues = self.queues.borrow_mut();
    let before = queues.timers.len();
    queues.timers.retain(|timer| timer.id != id);
    let cleared = queues.timers.len() != before;
    if cleared {
      tracing::debug!(target: "glue_js_web::event_loop", id, "timer cleared");
    }
    cleared
  }

  pub fn request_animation_frame(&self, callback: HostValue) -> i32 {
    let mut queues = self.queues.borrow_mut();
    let id = queues.id();
    queues.frames.push((id, callback));
    tracing::trace!(target: "glue_js_web::event_loop", id, "animation frame requested");
    id
  }

  pub fn cancel_animation_frame(&self, id: i32) -> bool {
    let mut queues = self.queues.borrow_mut();
    let before = queues.frames.len();
    queues.frames.retain(|(frame, _)| *frame != id);
    queues.frames.len() != before
  }

  /// Queues `callback` to run at the next microtask checkpoint.
  pub fn queue_microtask(&self, callback: HostValue) {
    self.enqueue(Microtask::Callback(callback));
  }

  pub(crate) fn enqueue(&self, task: Microtask) {
    self.queues.borrow_mut().microtasks.push_back(task);
  }

  pub fn pending_timers(&self) -> usize {
    self.queues.borrow().timers.len()
  }

  pub fn pending_frames(&self) -> usize {
    self.queues.borrow().frames.len()
  }

  pub fn pending_microtasks(&self) -> usize {
    self.queues.borrow().microtasks.len()
  }

  /// Moves the clock forward by `ms`, firing every timer that comes due on the way in order.
  /// Returns how many timer callbacks ran.
  ///
  /// On a bridge violation the clock stays at the failing timer's due time.
  pub fn advance(&self, bridge: &mut Bridge, ms: f64) -> Result<usize, BridgeError> {
    let step = if ms.is_finite() { ms.max(0.0) } else { 0.0 };
    let deadline = self.now() + step;
    let mut fired = 0;
    loop {
      let next = self.queues.borrow_mut().pop_due(deadline);
      let Some((id, callback)) = next else {
        break;
      };
      tracing::trace!(target: "glue_js_web::event_loop", id, now = self.now(), "timer fired");
      self.invoke(bridge, &callback, &[], "timer")?;
      self.run_microtasks(bridge)?;
      fired += 1;
    }
    self.queues.borrow_mut().now = deadline;
    Ok(fired)
  }

  /// Runs the animation frame callbacks registered before this call. Callbacks registered while
  /// the frame runs wait for the next frame.
  pub fn run_animation_frame(
    &self,
    bridge: &mut Bridge,
    timestamp: f64,
  ) -> Result<usize, BridgeError> {
    let frames = std::mem::take(&mut self.queues.borrow_mut().frames);
    tracing::trace!(target: "glue_js_web::event_loop", frames = frames.len(), timestamp, "animation frame");
    for (_, callback) in &frames {
      self.invoke(bridge, callback, &[HostValue::Number(timestamp)], "animation frame")?;
    }
    self.run_microtasks(bridge)?;
    Ok(frames.len())
  }

  /// Drains the microtask queue, including microtasks queued while draining.
  pub fn run_microtasks(&self, bridge: &mut Bridge) -> Result<usize, BridgeError> {
    let mut ran = 0;
    loop {
      let next = self.queues.borrow_mut().microtasks.pop_front();
      let Some(task) = next else {
        break;
      };
      match task {
        Microtask::Callback(callback) => self.invoke(bridge, &callback, &[], "microtask")?,
        Microtask::Reaction { reaction, outcome } => {
          promise::react(self, bridge, reaction, outcome)?
        }
      }
      ran += 1;
    }
    Ok(ran)
  }

  /// Reports a thrown exception to the console. Anything else is a bridge failure and stops the
  /// loop.
  fn invoke(
    &self,
    bridge: &mut Bridge,
    callback: &HostValue,
    args: &[HostValue],
    source: &str,
  ) -> Result<(), BridgeError> {
    match bridge.call_function(callback, args) {
      Ok(_) => Ok(()),
      Err(BridgeError::Throw(exception)) => {
        tracing::debug!(target: "glue_js_web::event_loop", source, "callback threw");
        self.console.push(Level::Error, format!("Uncaught {}", describe(&exception)));
        Ok(())
      }
      Err(err) => {
        tracing::error!(target: "glue_js_web::event_loop", source, %err, "event loop stopped");
        Err(err)
      }
    }
  }
}

/// `Name: message` for error objects; console formatting for anything else.
pub(crate) fn describe(exception: &HostValue) -> String {
  match exception.as_object().and_then(HostObject::as_error) {
    Some(error) => format!("{}: {}", error.name, error.message),
    None => match exception.as_string() {
      Some(text) => text.to_string_lossy(),
      None => glue_js::debug_string(exception),
    },
  }
}

impl fmt::Debug for EventLoop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let queues = self.queues.borrow();
    f.debug_struct("EventLoop")
      .field("now", &queues.now)
      .field("timers", &queues.timers.len())
      .field("frames", &queues.frames.len())
      .field("microtasks", &queues.microtasks.len())
      .finish()
  }
}
