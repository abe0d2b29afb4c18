use crate::error::Violation;
use crate::memory::{LinearMemory, MemoryBuffer};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// A fixed-width little-endian element of a typed view.
pub trait Element: Copy + fmt::Debug + 'static {
  const BYTES: usize;
  const NAME: &'static str;

  fn load(bytes: &[u8]) -> Self;
  fn store(self, out: &mut [u8]);
}

impl Element for u8 {
  const BYTES: usize = 1;
  const NAME: &'static str = "u8";

  fn load(bytes: &[u8]) -> Self {
    bytes[0]
  }

  fn store(self, out: &mut [u8]) {
    out[0] = self;
  }
}

impl Element for i32 {
  const BYTES: usize = 4;
  const NAME: &'static str = "i32";

  fn load(bytes: &[u8]) -> Self {
    let mut raw = [0; 4];
    raw.copy_from_slice(bytes);
    i32::from_le_bytes(raw)
  }

  fn store(self, out: &mut [u8]) {
    out.copy_from_slice(&self.to_le_bytes());
  }
}

impl Element for f64 {
  const BYTES: usize = 8;
  const NAME: &'static str = "f64";

  fn load(bytes: &[u8]) -> Self {
    let mut raw = [0; 8];
    raw.copy_from_slice(bytes);
    f64::from_le_bytes(raw)
  }

  fn store(self, out: &mut [u8]) {
    out.copy_from_slice(&self.to_le_bytes());
  }
}

/// An element-indexed view over one memory buffer.
///
/// A view never follows the memory across growth: once its buffer is replaced it reads as empty
/// and every access fails. Use [`ViewCache`] to always get a view of the current buffer.
pub struct TypedView<T: Element> {
  buffer: Rc<MemoryBuffer>,
  _element: PhantomData<T>,
}

pub type Uint8View = TypedView<u8>;
pub type Int32View = TypedView<i32>;
pub type Float64View = TypedView<f64>;

impl<T: Element> Clone for TypedView<T> {
  fn clone(&self) -> Self {
    Self {
      buffer: self.buffer.clone(),
      _element: PhantomData,
    }
  }
}

impl<T: Element> TypedView<T> {
  pub fn new(buffer: Rc<MemoryBuffer>) -> Self {
    Self {
      buffer,
      _element: PhantomData,
    }
  }

  pub fn buffer(&self) -> &Rc<MemoryBuffer> {
    &self.buffer
  }

  /// Length in elements; zero once detached.
  pub fn len(&self) -> usize {
    self.buffer.byte_len() / T::BYTES
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_detached(&self) -> bool {
    self.buffer.is_detached()
  }

  pub fn get(&self, index: usize) -> Result<T, Violation> {
    let offset = self.offset_of(index)?;
    self.buffer.with_range(offset, T::BYTES, T::load)
  }

  pub fn set(&self, index: usize, value: T) -> Result<(), Violation> {
    let offset = self.offset_of(index)?;
    self
      .buffer
      .with_range_mut(offset, T::BYTES, |out| value.store(out))
  }

  fn offset_of(&self, index: usize) -> Result<usize, Violation> {
    index
      .checked_mul(T::BYTES)
      .ok_or(Violation::OutOfBounds {
        offset: u64::MAX,
        len: T::BYTES as u64,
        size: self.buffer.byte_len() as u64,
      })
  }
}

impl TypedView<u8> {
  /// A view of bytes `start..end` sharing this view's buffer.
  pub fn subarray(&self, start: usize, end: usize) -> Result<ByteView, Violation> {
    let len = end.checked_sub(start).ok_or(Violation::OutOfBounds {
      offset: start as u64,
      len: 0,
      size: self.buffer.byte_len() as u64,
    })?;
    self.buffer.with_range(start, len, |_| ())?;
    Ok(ByteView {
      buffer: self.buffer.clone(),
      offset: start,
      len,
    })
  }

  pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, Violation> {
    self.buffer.with_range(offset, len, <[u8]>::to_vec)
  }

  pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), Violation> {
    self
      .buffer
      .with_range_mut(offset, data.len(), |out| out.copy_from_slice(data))
  }

  pub fn with_slice<R>(
    &self,
    offset: usize,
    len: usize,
    f: impl FnOnce(&[u8]) -> R,
  ) -> Result<R, Violation> {
    self.buffer.with_range(offset, len, f)
  }

  pub fn with_slice_mut<R>(
    &self,
    offset: usize,
    len: usize,
    f: impl FnOnce(&mut [u8]) -> R,
  ) -> Result<R, Violation> {
    self.buffer.with_range_mut(offset, len, f)
  }
}

impl<T: Element> fmt::Debug for TypedView<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TypedView")
      .field("element", &T::NAME)
      .field("len", &self.len())
      .field("detached", &self.is_detached())
      .finish()
  }
}

/// A byte range of guest memory lent to the host without copying.
///
/// The view is only meaningful for the duration of the call that produced it; after the memory
/// grows its length reads as zero and its contents are inaccessible.
#[derive(Clone)]
pub struct ByteView {
  buffer: Rc<MemoryBuffer>,
  offset: usize,
  len: usize,
}

impl ByteView {
  pub fn byte_offset(&self) -> usize {
    self.offset
  }

  pub fn len(&self) -> usize {
    if self.buffer.is_detached() {
      0
    } else {
      self.len
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_detached(&self) -> bool {
    self.buffer.is_detached()
  }

  pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, Violation> {
    self.buffer.with_range(self.offset, self.len, f)
  }

  pub fn to_vec(&self) -> Result<Vec<u8>, Violation> {
    self.with_bytes(<[u8]>::to_vec)
  }

  /// Writes `data` at the start of the range.
  pub fn copy_from(&self, data: &[u8]) -> Result<(), Violation> {
    if data.len() > self.len {
      return Err(Violation::OutOfBounds {
        offset: self.offset as u64,
        len: data.len() as u64,
        size: (self.offset + self.len) as u64,
      });
    }
    self
      .buffer
      .with_range_mut(self.offset, data.len(), |out| out.copy_from_slice(data))
  }
}

impl fmt::Debug for ByteView {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ByteView")
      .field("offset", &self.offset)
      .field("len", &self.len())
      .field("detached", &self.is_detached())
      .finish()
  }
}

/// Lazily created views of the current memory buffer.
///
/// Each view is re-created whenever the memory's buffer identity no longer matches the cached
/// one, so a view obtained after a growth always covers the whole memory.
#[derive(Default)]
pub struct ViewCache {
  bytes: Option<Uint8View>,
  ints32: Option<Int32View>,
  floats64: Option<Float64View>,
  refreshes: u64,
}

impl ViewCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn bytes(&mut self, memory: &LinearMemory) -> Uint8View {
    current(&mut self.bytes, &mut self.refreshes, memory)
  }

  pub fn ints32(&mut self, memory: &LinearMemory) -> Int32View {
    current(&mut self.ints32, &mut self.refreshes, memory)
  }

  pub fn floats64(&mut self, memory: &LinearMemory) -> Float64View {
    current(&mut self.floats64, &mut self.refreshes, memory)
  }

  /// How many cached views were replaced because the memory grew.
  pub fn refreshes(&self) -> u64 {
    self.refreshes
  }
}

fn current<T: Element>(
  slot: &mut Option<TypedView<T>>,
  refreshes: &mut u64,
  memory: &LinearMemory,
) -> TypedView<T> {
  if let Some(view) = slot.as_ref() {
    if memory.is_current(view.buffer()) {
      return view.clone();
    }
    *refreshes += 1;
    tracing::debug!(target: "glue_js::memory", element = T::NAME, "view recreated after growth");
  }
  let view = TypedView::new(memory.buffer());
  *slot = Some(view.clone());
  view
}
