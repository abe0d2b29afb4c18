use crate::handle::Handle;

/// Single-slot mailbox for host exceptions caught during fallible imports.
///
/// The guest learns about an exception by checking the slot after a fallible call returns, and
/// takes ownership of the stored handle when it clears the slot.
#[derive(Debug, Default)]
pub struct ErrorChannel {
  pending: Option<Handle>,
  raised: u64,
}

impl ErrorChannel {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parks `handle`. Returns whatever was still pending, which the caller now owns.
  pub fn store(&mut self, handle: Handle) -> Option<Handle> {
    self.raised += 1;
    tracing::debug!(target: "glue_js::exn", ?handle, "exception stored");
    self.pending.replace(handle)
  }

  pub fn is_pending(&self) -> bool {
    self.pending.is_some()
  }

  pub fn peek(&self) -> Option<Handle> {
    self.pending
  }

  /// Query-and-clear. A second call without an intervening store returns `None`.
  pub fn take(&mut self) -> Option<Handle> {
    let taken = self.pending.take();
    if let Some(handle) = taken {
      tracing::debug!(target: "glue_js::exn", ?handle, "exception taken");
    }
    taken
  }

  /// Total exceptions stored over the channel's lifetime.
  pub fn raised(&self) -> u64 {
    self.raised
  }
}
