use core::fmt;

/// Number of permanently occupied slots at the bottom of the handle table.
pub const RESERVED_HANDLES: u32 = 4;

/// An integer the guest holds in place of a host value.
///
/// The first [`RESERVED_HANDLES`] indices are constants shared by everyone and never recycled:
/// - `0` is `undefined`, which doubles as the "no value" sentinel in return positions,
/// - `1` is `true`, `2` is `false`,
/// - `3` is `null`.
///
/// Every other index names one slot of the [`HandleTable`](crate::HandleTable) and is owned by
/// exactly one guest-side reference until it is taken or dropped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(pub(crate) u32);

impl Handle {
  pub const UNDEFINED: Handle = Handle(0);
  pub const TRUE: Handle = Handle(1);
  pub const FALSE: Handle = Handle(2);
  pub const NULL: Handle = Handle(3);

  #[inline]
  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  #[inline]
  pub const fn from_bool(value: bool) -> Self {
    if value {
      Self::TRUE
    } else {
      Self::FALSE
    }
  }

  /// The slot index, which is also the value passed across the boundary.
  #[inline]
  pub const fn index(self) -> u32 {
    self.0
  }

  #[inline]
  pub const fn is_reserved(self) -> bool {
    self.0 < RESERVED_HANDLES
  }

  /// Whether this is the "no value" sentinel.
  #[inline]
  pub const fn is_none(self) -> bool {
    self.0 == 0
  }
}

impl fmt::Debug for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Handle::UNDEFINED => f.write_str("Handle(undefined)"),
      Handle::TRUE => f.write_str("Handle(true)"),
      Handle::FALSE => f.write_str("Handle(false)"),
      Handle::NULL => f.write_str("Handle(null)"),
      Handle(index) => write!(f, "Handle({index})"),
    }
  }
}

impl fmt::Display for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}
