use std::ptr::NonNull;

/// The managed bytes, addressed by 32-bit offsets from the region base.
///
/// Every piece of heap metadata (headers, footers, free-list links) lives
/// inside the region and is read and written as a `u32` word at a 4-byte
/// aligned offset. Keeping links as offsets instead of full pointers is what
/// lets a free block fit header, two links and footer in 16 bytes.
pub(crate) struct Region {
  base: NonNull<u8>,
  len: u32,
}

impl Region {
  /// Wraps `len` bytes starting at `base`.
  ///
  /// # Safety
  ///
  /// `base..base + len` must be valid for reads and writes, exclusively
  /// owned by the heap, and `base` must be aligned to 16 bytes.
  pub(crate) unsafe fn new(
    base: NonNull<u8>,
    len: u32,
  ) -> Self {
    Self { base, len }
  }

  pub(crate) fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub(crate) fn len(&self) -> u32 {
    self.len
  }

  /// Records that the backing store grew the region to `len` bytes.
  ///
  /// # Safety
  ///
  /// The bytes between the old and the new length must be valid and
  /// exclusively owned by the heap.
  pub(crate) unsafe fn grow_to(
    &mut self,
    len: u32,
  ) {
    debug_assert!(len >= self.len);
    self.len = len;
  }

  pub(crate) fn get(
    &self,
    offset: u32,
  ) -> u32 {
    debug_assert!(offset % 4 == 0, "unaligned word offset {offset:#x}");
    debug_assert!(offset + 4 <= self.len, "word offset {offset:#x} outside region");
    // SAFETY: the offset is word aligned and inside the region, which the
    // constructor guarantees to be valid and 16-byte aligned.
    unsafe { self.word(offset).read() }
  }

  pub(crate) fn put(
    &mut self,
    offset: u32,
    value: u32,
  ) {
    debug_assert!(offset % 4 == 0, "unaligned word offset {offset:#x}");
    debug_assert!(offset + 4 <= self.len, "word offset {offset:#x} outside region");
    // SAFETY: see `get`.
    unsafe { self.word(offset).write(value) }
  }

  /// Address of the byte at `offset`.
  pub(crate) fn ptr_at(
    &self,
    offset: u32,
  ) -> *mut u8 {
    // SAFETY: callers only pass offsets up to the region length.
    unsafe { self.base.as_ptr().add(offset as usize) }
  }

  /// Offset of `ptr` from the base, if it points inside the region.
  pub(crate) fn offset_of(
    &self,
    ptr: *const u8,
  ) -> Option<u32> {
    let addr = ptr as usize;
    let base = self.base.as_ptr() as usize;
    let offset = addr.checked_sub(base)?;
    (offset < self.len as usize).then_some(offset as u32)
  }

  #[allow(clippy::cast_ptr_alignment)]
  fn word(
    &self,
    offset: u32,
  ) -> *mut u32 {
    self.ptr_at(offset).cast::<u32>()
  }
}
