use glue_js::{debug_string, HostValue};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
  Log,
  Warn,
  Error,
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Level::Log => "log",
      Level::Warn => "warn",
      Level::Error => "error",
    })
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleEntry {
  pub level: Level,
  pub message: String,
}

/// Captured console output. Clones share the same log.
#[derive(Clone, Default)]
pub struct Console {
  entries: Rc<RefCell<Vec<ConsoleEntry>>>,
}

impl Console {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, level: Level, message: impl Into<String>) {
    let message = message.into();
    match level {
      Level::Log => tracing::info!(target: "glue_js_web::console", "{message}"),
      Level::Warn => tracing::warn!(target: "glue_js_web::console", "{message}"),
      Level::Error => tracing::error!(target: "glue_js_web::console", "{message}"),
    }
    self.entries.borrow_mut().push(ConsoleEntry { level, message });
  }

  /// Formats `value` the way the console prints it: strings verbatim, everything else in debug
  /// form.
  pub fn print(&self, level: Level, value: &HostValue) {
    let message = match value.as_string() {
      Some(text) => text.to_string_lossy(),
      None => debug_string(value),
    };
    self.push(level, message);
  }

  pub fn entries(&self) -> Vec<ConsoleEntry> {
    self.entries.borrow().clone()
  }

  pub fn messages(&self, level: Level) -> Vec<String> {
    self
      .entries
      .borrow()
      .iter()
      .filter(|entry| entry.level == level)
      .map(|entry| entry.message.clone())
      .collect()
  }

  pub fn clear(&self) {
    self.entries.borrow_mut().clear();
  }
}

impl fmt::Debug for Console {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Console")
      .field("entries", &self.entries.borrow().len())
      .finish()
  }
}
