use crate::error::{BridgeError, Violation};
use crate::handle::{Handle, RESERVED_HANDLES};
use crate::value::HostValue;

enum Slot {
  Live(HostValue),
  /// Link in the free list: the next vacant index, or `slots.len()` at the tail.
  Vacant { next: u32 },
}

/// Index-addressed table of host values owned by the guest.
///
/// Released slots are threaded into an intrusive free list headed by `next_free`, so the most
/// recently released index is the next one handed out. The reserved constants at the bottom of
/// the table are never part of the list.
pub struct HandleTable {
  slots: Vec<Slot>,
  next_free: u32,
  live: usize,
}

impl Default for HandleTable {
  fn default() -> Self {
    Self::with_capacity(0)
  }
}

impl HandleTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    let mut slots = Vec::with_capacity(capacity.max(RESERVED_HANDLES as usize));
    slots.push(Slot::Live(HostValue::Undefined));
    slots.push(Slot::Live(HostValue::Bool(true)));
    slots.push(Slot::Live(HostValue::Bool(false)));
    slots.push(Slot::Live(HostValue::Null));
    debug_assert_eq!(slots.len(), RESERVED_HANDLES as usize);
    Self {
      slots,
      next_free: RESERVED_HANDLES,
      live: 0,
    }
  }

  /// Stores `value` and returns a fresh handle for it. Never returns a reserved handle.
  pub fn allocate(&mut self, value: HostValue) -> Handle {
    if self.next_free as usize == self.slots.len() {
      self.slots.push(Slot::Vacant {
        next: self.next_free + 1,
      });
    }
    let index = self.next_free;
    let slot = &mut self.slots[index as usize];
    let next = match slot {
      Slot::Vacant { next } => *next,
      Slot::Live(_) => unreachable!("free list head {index} is occupied"),
    };
    *slot = Slot::Live(value);
    self.next_free = next;
    self.live += 1;
    tracing::trace!(target: "glue_js::heap", handle = index, live = self.live, "allocate");
    Handle(index)
  }

  /// Borrows the value behind `handle` without affecting ownership.
  pub fn resolve(&self, handle: Handle) -> Result<&HostValue, BridgeError> {
    match self.slots.get(handle.0 as usize) {
      Some(Slot::Live(value)) => Ok(value),
      _ => Err(Violation::StaleHandle(handle.0).into()),
    }
  }

  /// Releases `handle` and returns its value. Reserved handles yield their constant and stay put.
  pub fn take(&mut self, handle: Handle) -> Result<HostValue, BridgeError> {
    if handle.is_reserved() {
      return self.resolve(handle).cloned();
    }
    let index = handle.0;
    if !matches!(self.slots.get(index as usize), Some(Slot::Live(_))) {
      return Err(Violation::StaleHandle(index).into());
    }
    let released = std::mem::replace(
      &mut self.slots[index as usize],
      Slot::Vacant {
        next: self.next_free,
      },
    );
    self.next_free = index;
    self.live -= 1;
    tracing::trace!(target: "glue_js::heap", handle = index, live = self.live, "release");
    match released {
      Slot::Live(value) => Ok(value),
      Slot::Vacant { .. } => unreachable!("slot {index} checked live above"),
    }
  }

  /// Releases `handle`, discarding the value.
  pub fn drop(&mut self, handle: Handle) -> Result<(), BridgeError> {
    self.take(handle).map(|_| ())
  }

  /// Allocates a second handle for the same value. Objects keep their identity.
  pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle, BridgeError> {
    let value = self.resolve(handle)?.clone();
    Ok(self.allocate(value))
  }

  pub fn is_live(&self, handle: Handle) -> bool {
    matches!(self.slots.get(handle.0 as usize), Some(Slot::Live(_)))
  }

  /// Number of non-reserved handles currently owned by the guest.
  pub fn live(&self) -> usize {
    self.live
  }

  /// Total slots ever materialized, reserved ones included.
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  pub fn live_handles(&self) -> impl Iterator<Item = Handle> + '_ {
    self
      .slots
      .iter()
      .enumerate()
      .skip(RESERVED_HANDLES as usize)
      .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
      .map(|(index, _)| Handle(index as u32))
  }
}
