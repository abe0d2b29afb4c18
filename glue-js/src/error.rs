use crate::dispatch::RetRule;
use crate::value::HostValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
  MaxStringBytes,
}

/// Internal consistency failures.
///
/// Each of these means one side of the bridge broke its half of the contract (a handle used after
/// release, a closure invoked after teardown, an argument of the wrong width). They are never
/// recovered from: the first one poisons the [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
  /// A handle that is out of range or whose slot is vacant.
  #[error("stale handle {0}")]
  StaleHandle(u32),

  #[error("closure invoked after teardown")]
  ClosureConsumed,

  /// A `FnMut` closure was invoked while another invocation of it was still on the stack.
  #[error("mutable closure invoked recursively")]
  ClosureReentered,

  #[error("closure registered without captured state")]
  NullClosureState,

  #[error("value is not a guest closure")]
  NotAClosure,

  #[error("out of bounds guest memory access: offset {offset}, len {len}, memory size {size}")]
  OutOfBounds { offset: u64, len: u64, size: u64 },

  #[error("misaligned out-parameter at {ptr} (requires alignment {align})")]
  Misaligned { ptr: u32, align: u32 },

  /// A view whose buffer was replaced by a memory growth.
  #[error("access through a detached memory view")]
  DetachedView,

  #[error("{import}: expected {expected} words, got {got}")]
  ArityMismatch {
    import: &'static str,
    expected: usize,
    got: usize,
  },

  #[error("{import}: argument {index} has the wrong type")]
  ArgTypeMismatch { import: &'static str, index: usize },

  #[error("{import}: host result does not fit {rule:?}")]
  ResultMismatch { import: &'static str, rule: RetRule },

  #[error("{owner}: guest returned a value of the wrong type")]
  GuestResultMismatch { owner: &'static str },

  #[error("guest function table has no entry {0}")]
  UnknownGuestFunction(u32),

  #[error("import id {0} was never linked")]
  UnknownImport(u32),
}

/// Errors produced while moving values and calls across the bridge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
  /// Guest bytes that are not valid UTF-8. The guest's own contract guarantees this never happens,
  /// so it is reported rather than replaced.
  #[error("invalid utf-8 in {len}-byte string at {ptr} (valid up to byte {valid_up_to})")]
  InvalidUtf8 {
    ptr: u32,
    len: u32,
    valid_up_to: usize,
  },

  /// A fallible import caught a host exception and parked it in the error channel.
  #[error("host exception pending")]
  ExceptionPending,

  /// A host exception unwinding through the bridge.
  #[error("uncaught host exception")]
  Throw(HostValue),

  /// The guest called an import the current host does not provide.
  #[error("host does not support `{import}`")]
  Unsupported { import: String },

  #[error("no import named `{name}` has been linked")]
  UnresolvedImport { name: String },

  #[error("guest does not export `{name}`")]
  UnresolvedExport { name: String },

  #[error("abi version mismatch: guest expects {expected}, host provides {found}")]
  AbiMismatch { expected: u32, found: u32 },

  #[error("guest memory exhausted (requested {requested} bytes)")]
  OutOfMemory { requested: u64 },

  #[error("bridge limit exceeded ({limit:?}): got {got}, max {max}")]
  LimitExceeded { limit: Limit, got: usize, max: usize },

  #[error("invalid bridge options: {0}")]
  InvalidOptions(String),

  #[error(transparent)]
  Violation(#[from] Violation),

  /// A call attempted after an earlier violation.
  #[error("bridge poisoned by an earlier violation: {0}")]
  Poisoned(Violation),
}

/// A thrown host value. Lets host operations use `?` on helpers that fail with an exception.
impl From<HostValue> for BridgeError {
  fn from(exception: HostValue) -> Self {
    BridgeError::Throw(exception)
  }
}

impl BridgeError {
  pub(crate) fn limit_exceeded(limit: Limit, got: usize, max: usize) -> Self {
    Self::LimitExceeded { limit, got, max }
  }

  /// Whether this error leaves the bridge unusable.
  pub fn is_fatal(&self) -> bool {
    matches!(self, BridgeError::Violation(_) | BridgeError::Poisoned(_))
  }

  /// The violation behind a fatal error.
  pub fn violation(&self) -> Option<&Violation> {
    match self {
      BridgeError::Violation(v) | BridgeError::Poisoned(v) => Some(v),
      _ => None,
    }
  }
}
