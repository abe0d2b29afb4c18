use crate::error::{BridgeError, Violation};
use crate::view::{ByteView, Float64View, Int32View, Uint8View, ViewCache};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub const PAGE_SIZE: usize = 64 * 1024;
/// Hard ceiling of a 32-bit linear memory.
pub const MAX_PAGES: u32 = 65536;

/// One backing allocation of the guest's linear memory.
///
/// Growing the memory replaces the buffer. The old one is detached: it reports a length of zero
/// and any access through it is a [`Violation::DetachedView`].
pub struct MemoryBuffer {
  bytes: RefCell<Vec<u8>>,
  detached: Cell<bool>,
}

impl MemoryBuffer {
  fn new(bytes: Vec<u8>) -> Rc<Self> {
    Rc::new(Self {
      bytes: RefCell::new(bytes),
      detached: Cell::new(false),
    })
  }

  pub fn byte_len(&self) -> usize {
    if self.is_detached() {
      0
    } else {
      self.bytes.borrow().len()
    }
  }

  pub fn is_detached(&self) -> bool {
    self.detached.get()
  }

  fn detach(&self) -> Vec<u8> {
    self.detached.set(true);
    std::mem::take(&mut *self.bytes.borrow_mut())
  }

  fn check(&self, offset: usize, len: usize) -> Result<(), Violation> {
    if self.is_detached() {
      return Err(Violation::DetachedView);
    }
    let size = self.byte_len();
    match offset.checked_add(len) {
      Some(end) if end <= size => Ok(()),
      _ => Err(Violation::OutOfBounds {
        offset: offset as u64,
        len: len as u64,
        size: size as u64,
      }),
    }
  }

  pub(crate) fn with_range<R>(
    &self,
    offset: usize,
    len: usize,
    f: impl FnOnce(&[u8]) -> R,
  ) -> Result<R, Violation> {
    self.check(offset, len)?;
    let bytes = self.bytes.borrow();
    Ok(f(&bytes[offset..offset + len]))
  }

  pub(crate) fn with_range_mut<R>(
    &self,
    offset: usize,
    len: usize,
    f: impl FnOnce(&mut [u8]) -> R,
  ) -> Result<R, Violation> {
    self.check(offset, len)?;
    let mut bytes = self.bytes.borrow_mut();
    Ok(f(&mut bytes[offset..offset + len]))
  }

  fn copy_within(&self, src: usize, dst: usize, len: usize) -> Result<(), Violation> {
    self.check(src, len)?;
    self.check(dst, len)?;
    self.bytes.borrow_mut().copy_within(src..src + len, dst);
    Ok(())
  }
}

struct MemoryInner {
  buffer: RefCell<Rc<MemoryBuffer>>,
  max_pages: u32,
}

/// The guest's linear memory. Clones refer to the same memory.
#[derive(Clone)]
pub struct LinearMemory {
  inner: Rc<MemoryInner>,
}

impl LinearMemory {
  pub fn new(initial_pages: u32, max_pages: u32) -> Result<Self, BridgeError> {
    if max_pages > MAX_PAGES || initial_pages > max_pages {
      return Err(BridgeError::InvalidOptions(format!(
        "memory of {initial_pages} pages cannot have a maximum of {max_pages} pages"
      )));
    }
    Ok(Self {
      inner: Rc::new(MemoryInner {
        buffer: RefCell::new(MemoryBuffer::new(vec![
          0;
          initial_pages as usize * PAGE_SIZE
        ])),
        max_pages,
      }),
    })
  }

  /// The current backing buffer.
  pub fn buffer(&self) -> Rc<MemoryBuffer> {
    self.inner.buffer.borrow().clone()
  }

  pub fn is_current(&self, buffer: &Rc<MemoryBuffer>) -> bool {
    Rc::ptr_eq(&self.inner.buffer.borrow(), buffer)
  }

  pub fn byte_len(&self) -> usize {
    self.inner.buffer.borrow().byte_len()
  }

  pub fn pages(&self) -> u32 {
    (self.byte_len() / PAGE_SIZE) as u32
  }

  pub fn max_pages(&self) -> u32 {
    self.inner.max_pages
  }

  /// Grows by `delta` pages and returns the previous size in pages.
  pub fn grow(&self, delta: u32) -> Result<u32, BridgeError> {
    let previous = self.pages();
    if delta == 0 {
      return Ok(previous);
    }
    let pages = previous
      .checked_add(delta)
      .filter(|&pages| pages <= self.inner.max_pages)
      .ok_or(BridgeError::OutOfMemory {
        requested: (previous as u64 + delta as u64) * PAGE_SIZE as u64,
      })?;
    let mut slot = self.inner.buffer.borrow_mut();
    let mut bytes = slot.detach();
    bytes.resize(pages as usize * PAGE_SIZE, 0);
    *slot = MemoryBuffer::new(bytes);
    tracing::debug!(target: "glue_js::memory", from_pages = previous, to_pages = pages, "grow");
    Ok(previous)
  }
}

impl fmt::Debug for LinearMemory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinearMemory")
      .field("pages", &self.pages())
      .field("max_pages", &self.inner.max_pages)
      .finish()
  }
}

/// The guest's allocator, as exported by the guest module.
pub trait GuestAllocator {
  fn malloc(&mut self, memory: &LinearMemory, size: u32, align: u32) -> Result<u32, BridgeError>;

  /// Resizes an allocation, preserving its first `min(old_size, new_size)` bytes.
  fn realloc(
    &mut self,
    memory: &LinearMemory,
    ptr: u32,
    old_size: u32,
    new_size: u32,
    align: u32,
  ) -> Result<u32, BridgeError>;

  fn free(&mut self, _memory: &LinearMemory, _ptr: u32, _size: u32, _align: u32) {}
}

/// Never-freeing allocator that grows the memory on demand.
///
/// Addresses below `base` are left alone for the guest's own scratch use (return slots and the
/// like). The most recent allocation can be extended in place.
#[derive(Debug, Clone)]
pub struct BumpAllocator {
  base: u32,
  next: u32,
  last: Option<(u32, u32)>,
}

impl Default for BumpAllocator {
  fn default() -> Self {
    Self::new(Self::DEFAULT_BASE)
  }
}

impl BumpAllocator {
  pub const DEFAULT_BASE: u32 = 1024;

  pub fn new(base: u32) -> Self {
    Self {
      base,
      next: base,
      last: None,
    }
  }

  pub fn used(&self) -> u32 {
    self.next - self.base
  }

  fn reserve(&self, memory: &LinearMemory, end: u64) -> Result<(), BridgeError> {
    if end > u32::MAX as u64 {
      return Err(BridgeError::OutOfMemory { requested: end });
    }
    let size = memory.byte_len() as u64;
    if end > size {
      let page = PAGE_SIZE as u64;
      let pages = (end - size).div_ceil(page);
      memory.grow(pages as u32)?;
    }
    Ok(())
  }
}

impl GuestAllocator for BumpAllocator {
  fn malloc(&mut self, memory: &LinearMemory, size: u32, align: u32) -> Result<u32, BridgeError> {
    let align = align.max(1) as u64;
    debug_assert!(align.is_power_of_two());
    let ptr = (self.next as u64 + align - 1) & !(align - 1);
    let end = ptr + size as u64;
    self.reserve(memory, end)?;
    self.next = end as u32;
    self.last = Some((ptr as u32, size));
    Ok(ptr as u32)
  }

  fn realloc(
    &mut self,
    memory: &LinearMemory,
    ptr: u32,
    old_size: u32,
    new_size: u32,
    align: u32,
  ) -> Result<u32, BridgeError> {
    if new_size <= old_size {
      return Ok(ptr);
    }
    if self.last == Some((ptr, old_size)) {
      let end = ptr as u64 + new_size as u64;
      self.reserve(memory, end)?;
      self.next = end as u32;
      self.last = Some((ptr, new_size));
      return Ok(ptr);
    }
    let moved = self.malloc(memory, new_size, align)?;
    memory
      .buffer()
      .copy_within(ptr as usize, moved as usize, old_size as usize)?;
    Ok(moved)
  }
}

/// Linear memory together with its cached views and the guest allocator.
pub struct GuestMemory {
  linear: LinearMemory,
  views: ViewCache,
  allocator: Box<dyn GuestAllocator>,
}

impl GuestMemory {
  pub fn new(linear: LinearMemory, allocator: Box<dyn GuestAllocator>) -> Self {
    Self {
      linear,
      views: ViewCache::new(),
      allocator,
    }
  }

  pub fn linear(&self) -> &LinearMemory {
    &self.linear
  }

  pub fn views(&self) -> &ViewCache {
    &self.views
  }

  pub fn bytes(&mut self) -> Uint8View {
    self.views.bytes(&self.linear)
  }

  pub fn ints32(&mut self) -> Int32View {
    self.views.ints32(&self.linear)
  }

  pub fn floats64(&mut self) -> Float64View {
    self.views.floats64(&self.linear)
  }

  pub fn malloc(&mut self, size: u32, align: u32) -> Result<u32, BridgeError> {
    self.allocator.malloc(&self.linear, size, align)
  }

  pub fn realloc(
    &mut self,
    ptr: u32,
    old_size: u32,
    new_size: u32,
    align: u32,
  ) -> Result<u32, BridgeError> {
    self.allocator.realloc(&self.linear, ptr, old_size, new_size, align)
  }

  pub fn free(&mut self, ptr: u32, size: u32, align: u32) {
    self.allocator.free(&self.linear, ptr, size, align)
  }

  /// Zero-copy view of `len` bytes at `ptr`.
  pub fn borrow_bytes(&mut self, ptr: u32, len: u32) -> Result<ByteView, Violation> {
    let start = ptr as usize;
    self.bytes().subarray(start, start + len as usize)
  }

  pub fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, Violation> {
    self.bytes().read(ptr as usize, len as usize)
  }

  pub fn write(&mut self, ptr: u32, data: &[u8]) -> Result<(), Violation> {
    self.bytes().write(ptr as usize, data)
  }
}
