//! Backing stores: where the heap gets its bytes from.
//!
//! A store only ever grows. Every successful [`BackingStore::extend`] returns
//! the start of the newly added bytes, which must directly follow the bytes
//! handed out before, and never moves or reclaims earlier bytes.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};
use snafu::ensure;

use crate::{
  block::ALIGNMENT,
  error::{StoreError, store_error},
};

/// A monotonically growing, contiguous memory region.
pub trait BackingStore {
  /// Grows the region by `bytes` bytes and returns the address of the first
  /// new byte.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, StoreError>;

  /// Current `(low, high)` bounds of the region, `high` exclusive.
  fn region_bounds(&self) -> (*mut u8, *mut u8);
}

/// Grows the process data segment through `sbrk(2)`.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓ grows down
///                │                     │
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← Program Break
///                │   Uninitialized     │
///                │       Data          │
///   Low Address  └─────────────────────┘
/// ```
#[derive(Debug)]
pub struct SbrkStore {
  low: *mut u8,
  high: *mut u8,
}

impl SbrkStore {
  /// Claims the current program break, padding it to the alignment unit.
  ///
  /// # Safety
  ///
  /// Nothing else in the process may lower the program break while the
  /// store (or a heap built on it) is alive. Other code raising the break
  /// is detected and reported as [`StoreError::NonContiguous`].
  pub unsafe fn new() -> Result<Self, StoreError> {
    unsafe {
      let current = sbrk(0).cast::<u8>();
      let padding = current.align_offset(ALIGNMENT);
      if padding > 0 && Self::failed(sbrk(padding as intptr_t)) {
        return store_error::ExhaustedSnafu { requested: padding }.fail();
      }
      let low = current.add(padding);
      log::debug!("sbrk store starts at {low:?}");
      Ok(Self { low, high: low })
    }
  }

  fn failed(address: *mut c_void) -> bool {
    address == usize::MAX as *mut c_void
  }
}

impl BackingStore for SbrkStore {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, StoreError> {
    let Ok(increment) = intptr_t::try_from(bytes) else {
      return store_error::ExhaustedSnafu { requested: bytes }.fail();
    };
    // SAFETY: moving the break up only hands new memory to this store.
    let address = unsafe { sbrk(increment) };
    ensure!(
      !Self::failed(address),
      store_error::ExhaustedSnafu { requested: bytes }
    );

    let address = address.cast::<u8>();
    ensure!(
      address == self.high,
      store_error::NonContiguousSnafu {
        expected: self.high as usize,
        actual: address as usize,
      }
    );

    // SAFETY: sbrk just mapped `bytes` bytes at `address`.
    self.high = unsafe { address.add(bytes) };
    NonNull::new(address).ok_or_else(|| store_error::ExhaustedSnafu { requested: bytes }.build())
  }

  fn region_bounds(&self) -> (*mut u8, *mut u8) {
    (self.low, self.high)
  }
}

/// A fixed reservation handed out front to back.
///
/// The whole capacity is reserved (and zeroed) up front, so addresses stay
/// put; `extend` only moves the high-water mark. Useful for tests and for
/// embedding a heap inside a bounded budget.
#[derive(Debug)]
pub struct ArenaStore {
  base: NonNull<u8>,
  capacity: usize,
  len: usize,
  extend_calls: usize,
}

impl ArenaStore {
  /// Reserves `capacity` bytes aligned to the alignment unit.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` does not form a valid layout.
  #[must_use]
  pub fn with_capacity(capacity: usize) -> Self {
    let layout = Self::layout(capacity);
    // SAFETY: the layout has a non-zero size.
    let base = unsafe { alloc::alloc_zeroed(layout) };
    let Some(base) = NonNull::new(base) else {
      alloc::handle_alloc_error(layout);
    };
    Self {
      base,
      capacity,
      len: 0,
      extend_calls: 0,
    }
  }

  fn layout(capacity: usize) -> Layout {
    Layout::from_size_align(capacity.max(ALIGNMENT), ALIGNMENT)
      .unwrap_or_else(|_| panic!("arena capacity {capacity} overflows a layout"))
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes handed out so far.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Number of `extend` calls seen, successful or not.
  pub fn extend_calls(&self) -> usize {
    self.extend_calls
  }
}

impl BackingStore for ArenaStore {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, StoreError> {
    self.extend_calls += 1;
    ensure!(
      bytes <= self.capacity - self.len,
      store_error::ExhaustedSnafu { requested: bytes }
    );
    // SAFETY: `len + bytes` stays within the reservation.
    let address = unsafe { self.base.add(self.len) };
    self.len += bytes;
    Ok(address)
  }

  fn region_bounds(&self) -> (*mut u8, *mut u8) {
    let low = self.base.as_ptr();
    (low, low.wrapping_add(self.len))
  }
}

impl Drop for ArenaStore {
  fn drop(&mut self) {
    // SAFETY: allocated in `with_capacity` with the same layout.
    unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_grows_contiguously() {
    let mut store = ArenaStore::with_capacity(256);
    let (low, high) = store.region_bounds();
    assert_eq!(low, high);
    assert_eq!(low as usize % ALIGNMENT, 0);

    let first = store.extend(32).unwrap();
    let second = store.extend(64).unwrap();
    assert_eq!(first.as_ptr(), low);
    assert_eq!(second.as_ptr() as usize, low as usize + 32);
    assert_eq!(store.region_bounds().1 as usize, low as usize + 96);
    assert_eq!(store.len(), 96);
    assert_eq!(store.extend_calls(), 2);
  }

  #[test]
  fn test_arena_exhaustion() {
    let mut store = ArenaStore::with_capacity(64);
    store.extend(48).unwrap();

    let err = store.extend(32).unwrap_err();
    assert!(matches!(err, StoreError::Exhausted { requested: 32, .. }));
    assert_eq!(store.len(), 48);
    assert_eq!(store.extend_calls(), 2);

    store.extend(16).unwrap();
    assert_eq!(store.len(), store.capacity());
  }
}
