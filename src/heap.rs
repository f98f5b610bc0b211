use std::ptr::{self, NonNull};

use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
  block::{ALIGNMENT, Block, DSIZE, MIN_BLOCK_SIZE, WSIZE},
  config::{FitPolicy, HeapConfig},
  error::{InitError, ReleaseError, StoreError, init_error, release_error, store_error},
  free_list::FreeList,
  region::Region,
  store::BackingStore,
};

/// Bytes requested from the store when the heap is created: a padding
/// word, the sentinel, the prologue and the first epilogue header.
const INITIAL_SIZE: u32 = 2 * ALIGNMENT as u32;
const SENTINEL: Block = Block::at(2 * WSIZE);
const PROLOGUE: Block = Block::at(6 * WSIZE);
/// Offset of the first block that can ever be handed out.
pub(crate) const FIRST_BLOCK: Block = Block::at(INITIAL_SIZE);
/// Largest region the 32-bit offsets and size fields can describe.
const MAX_REGION: u32 = u32::MAX & !(ALIGNMENT as u32 - 1);

/// A boundary-tag heap over a growing [`BackingStore`].
///
/// ```text
///   offset 0   4        8               20     24     28       32
///   ┌────────┬────────┬───────┬───────┬──────┬──────┬─────────┬──────────────┬─────┐
///   │  pad   │ S hdr  │ next  │ prev  │S ftr │P hdr │  P pad  │ blocks ...   │ epi │
///   └────────┴────────┴───────┴───────┴──────┴──────┴─────────┴──────────────┴─────┘
///             └──── sentinel (16) ───────────┘└── prologue (8) ┘
/// ```
///
/// The sentinel anchors the free list, the prologue and the zero-sized
/// epilogue bracket the physical block chain so that walks never need to
/// special-case the first or the last block.
pub struct Heap<S: BackingStore> {
  pub(crate) store: S,
  pub(crate) config: HeapConfig,
  pub(crate) region: Region,
  pub(crate) free_list: FreeList,
  pub(crate) epilogue: Block,
}

impl<S: BackingStore> Heap<S> {
  /// Lays out a fresh heap at the current end of `store` and grows it by
  /// one chunk.
  pub fn new(
    mut store: S,
    config: HeapConfig,
  ) -> Result<Self, InitError> {
    let base = store
      .extend(INITIAL_SIZE as usize)
      .context(init_error::StoreSnafu)?;
    ensure!(
      base.as_ptr().align_offset(ALIGNMENT) == 0,
      init_error::MisalignedBaseSnafu {
        base: base.as_ptr() as usize,
      }
    );

    // The store may have rounded the request up; the slack behind the
    // first epilogue goes to the first extension.
    let (_, high) = store.region_bounds();
    let len = reported_len(base, high, INITIAL_SIZE as usize);
    // SAFETY: the store just handed these bytes to us and never moves them.
    let mut region = unsafe { Region::new(base, len) };
    region.put(0, 0);
    let free_list = FreeList::init(&mut region, SENTINEL);
    PROLOGUE.make_allocated(&mut region, DSIZE, true);
    let epilogue = FIRST_BLOCK;
    epilogue.make_allocated(&mut region, 0, true);

    let mut heap = Self {
      store,
      config,
      region,
      free_list,
      epilogue,
    };
    heap
      .extend_heap(config.chunk_size())
      .context(init_error::StoreSnafu)?;
    log::debug!(
      "heap initialised at {:?}, {} bytes, {:?}",
      base,
      heap.region.len(),
      config,
    );
    Ok(heap)
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Allocates at least `size` bytes aligned to 16 bytes.
  ///
  /// Returns null for `size == 0` and when the backing store cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }
    let Some(asize) = adjusted_size(size) else {
      log::warn!("allocate({size}) exceeds the largest block");
      return ptr::null_mut();
    };

    let block = match self.find_fit(asize) {
      Some(block) => block,
      None => match self.extend_heap((asize as usize).max(self.config.chunk_size())) {
        Ok(block) => block,
        Err(err) => {
          log::warn!("allocate({size}) failed: {err}");
          return ptr::null_mut();
        }
      },
    };
    self.place(block, asize);

    let address = self.region.ptr_at(block.offset());
    log::trace!("allocate({size}) -> {address:?} (block {asize})");
    address
  }

  /// Returns the block at `ptr` to the heap. Null is ignored, and so is any
  /// address [`try_release`](Self::try_release) rejects.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or an address returned by this heap that has not
  /// been released since. The payload must not be used afterwards.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if let Err(err) = unsafe { self.try_release(ptr) } {
      log::warn!("ignoring release of {ptr:?}: {err}");
    }
  }

  /// Like [`release`](Self::release), but reports addresses that are
  /// recognisably not live allocations of this heap.
  ///
  /// Detection is best effort: an address in the middle of a live payload
  /// can carry a plausible header and slip through.
  ///
  /// # Safety
  ///
  /// Same as [`release`](Self::release).
  pub unsafe fn try_release(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), ReleaseError> {
    if ptr.is_null() {
      return Ok(());
    }
    let block = self.allocated_block(ptr)?;
    self.free_block(block);
    log::trace!("release({ptr:?})");
    Ok(())
  }

  /// Resizes the allocation at `ptr` to `size` bytes, moving it only when
  /// it can neither shrink nor grow in place.
  ///
  /// `size == 0` releases `ptr` and returns null; a null `ptr` allocates.
  /// On failure null is returned and the original block is left untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live allocation of this heap. When a different
  /// address is returned, the old one must not be used anymore.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      unsafe { self.release(ptr) };
      return ptr::null_mut();
    }
    if ptr.is_null() {
      return self.allocate(size);
    }

    let block = match self.allocated_block(ptr) {
      Ok(block) => block,
      Err(err) => {
        log::warn!("reallocate({ptr:?}, {size}) rejected: {err}");
        return ptr::null_mut();
      }
    };
    let Some(asize) = adjusted_size(size) else {
      log::warn!("reallocate({ptr:?}, {size}) exceeds the largest block");
      return ptr::null_mut();
    };

    let old_size = block.size(&self.region);
    if old_size >= asize + MIN_BLOCK_SIZE {
      self.shrink_in_place(block, asize);
      log::trace!("reallocate({ptr:?}, {size}) shrunk {old_size} -> {asize}");
      return ptr;
    }
    if old_size >= asize {
      return ptr;
    }
    if self.grow_in_place(block, asize) {
      log::trace!("reallocate({ptr:?}, {size}) grew in place from {old_size}");
      return ptr;
    }

    let new_ptr = self.allocate(size);
    if new_ptr.is_null() {
      log::warn!("reallocate({ptr:?}, {size}) failed, original block kept");
      return ptr::null_mut();
    }
    let payload = (old_size - WSIZE) as usize;
    // SAFETY: both payloads are live and distinct blocks of this heap, and
    // neither is shorter than the copied length.
    unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, payload.min(size)) };
    self.free_block(block);
    log::trace!("reallocate({ptr:?}, {size}) moved to {new_ptr:?}");
    new_ptr
  }

  /// Allocates zeroed memory for `count` elements of `size` bytes.
  ///
  /// Returns null when `count * size` overflows.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(bytes) = count.checked_mul(size) else {
      log::warn!("allocate_zeroed({count}, {size}) overflows");
      return ptr::null_mut();
    };
    let address = self.allocate(bytes);
    if !address.is_null() {
      // SAFETY: the block just allocated holds at least `bytes` bytes.
      unsafe { ptr::write_bytes(address, 0, bytes) };
    }
    address
  }

  /// Number of payload bytes the allocation at `ptr` can hold, or `None` if
  /// `ptr` is not a live allocation of this heap.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    let block = self.allocated_block(ptr).ok()?;
    Some((block.size(&self.region) - WSIZE) as usize)
  }

  /// Validates that `ptr` is the payload address of an allocated block.
  fn allocated_block(
    &self,
    ptr: *const u8,
  ) -> Result<Block, ReleaseError> {
    let addr = ptr as usize;
    let offset = self
      .region
      .offset_of(ptr)
      .context(release_error::OutOfRegionSnafu { addr })?;
    ensure!(
      offset >= FIRST_BLOCK.offset() && offset < self.epilogue.offset(),
      release_error::OutOfRegionSnafu { addr }
    );
    ensure!(
      offset as usize % ALIGNMENT == 0,
      release_error::MisalignedSnafu { addr }
    );

    let block = Block::at(offset);
    let header = block.header(&self.region);
    ensure!(header.is_allocated(), release_error::NotAllocatedSnafu { addr });
    let size = header.size();
    ensure!(
      size >= MIN_BLOCK_SIZE
        && size as usize % ALIGNMENT == 0
        && size <= self.epilogue.offset() - offset,
      release_error::BadSizeSnafu { addr, size }
    );
    ensure!(
      block.next(&self.region).is_prev_allocated(&self.region),
      release_error::NotAllocatedSnafu { addr }
    );
    Ok(block)
  }

  /// Marks an allocated block free and merges it with free neighbours.
  fn free_block(
    &mut self,
    block: Block,
  ) {
    let header = block.header(&self.region);
    block.make_free(&mut self.region, header.size(), header.is_prev_allocated());
    self.coalesce(block);
  }

  fn find_fit(
    &self,
    asize: u32,
  ) -> Option<Block> {
    let region = &self.region;
    let mut candidates = self.free_list.iter(region);
    match self.config.fit() {
      FitPolicy::FirstFit => candidates.find(|block| block.size(region) >= asize),
      FitPolicy::BestFit => {
        let mut best: Option<(Block, u32)> = None;
        for block in candidates {
          let size = block.size(region);
          if size >= asize && best.is_none_or(|(_, best_size)| size < best_size) {
            best = Some((block, size));
            if size == asize {
              break;
            }
          }
        }
        best.map(|(block, _)| block)
      }
    }
  }

  /// Turns the free `block` into an allocated block of `asize` bytes,
  /// splitting off the rest when it can form a block of its own.
  fn place(
    &mut self,
    block: Block,
    asize: u32,
  ) {
    let region = &mut self.region;
    let csize = block.size(region);
    self.free_list.remove(region, block);

    if csize - asize >= MIN_BLOCK_SIZE {
      block.make_allocated(region, asize, true);
      let rest = block.next(region);
      rest.make_free(region, csize - asize, true);
      self.free_list.insert(region, rest);
    } else {
      block.make_allocated(region, csize, true);
      block.next(region).set_prev_allocated(region, true);
    }
  }

  /// Merges the free `block` with its free physical neighbours and puts
  /// the result on the free list. Returns the merged block.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    let region = &mut self.region;
    let list = &self.free_list;

    let prev_allocated = block.is_prev_allocated(region);
    let next = block.next(region);
    let next_allocated = next.is_allocated(region);
    let mut size = block.size(region);

    let merged = match (prev_allocated, next_allocated) {
      (true, true) => {
        next.set_prev_allocated(region, false);
        block
      }
      (true, false) => {
        size += next.size(region);
        list.remove(region, next);
        block.make_free(region, size, true);
        block
      }
      (false, true) => {
        next.set_prev_allocated(region, false);
        let prev = block.prev(region);
        let before_prev = prev.is_prev_allocated(region);
        size += prev.size(region);
        list.remove(region, prev);
        prev.make_free(region, size, before_prev);
        prev
      }
      (false, false) => {
        let prev = block.prev(region);
        let before_prev = prev.is_prev_allocated(region);
        size += prev.size(region) + next.size(region);
        list.remove(region, prev);
        list.remove(region, next);
        prev.make_free(region, size, before_prev);
        prev
      }
    };
    list.insert(region, merged);
    merged
  }

  /// Grows the region by at least `bytes`, turns the new space into a free
  /// block and merges it with a free last block. Returns the merged block.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<Block, StoreError> {
    let bytes = crate::align!(bytes);
    let len = self.region.len();
    ensure!(
      bytes <= (MAX_REGION - len) as usize,
      store_error::OffsetOverflowSnafu { requested: bytes }
    );

    let base = self.region.base().as_ptr() as usize;
    let expected = base + len as usize;
    let address = self.store.extend(bytes)?;
    ensure!(
      address.as_ptr() as usize == expected,
      store_error::NonContiguousSnafu {
        expected,
        actual: address.as_ptr() as usize,
      }
    );

    // A store may round the request up; take everything it reports.
    let (_, high) = self.store.region_bounds();
    let new_len = reported_len(self.region.base(), high, len as usize + bytes);
    // SAFETY: the store handed out the bytes up to `high`.
    unsafe { self.region.grow_to(new_len) };

    // The old epilogue header becomes the header of the new block, which
    // inherits its prev-allocated bit.
    let block = self.epilogue;
    let prev_allocated = block.is_prev_allocated(&self.region);
    let size = (new_len - block.offset()) & !(MIN_BLOCK_SIZE - 1);
    block.make_free(&mut self.region, size, prev_allocated);
    self.epilogue = block.next(&self.region);
    self.epilogue.make_allocated(&mut self.region, 0, false);
    log::debug!(
      "extended heap by {size} bytes at {:?}, region is {new_len} bytes",
      self.region.ptr_at(block.offset()),
    );

    Ok(self.coalesce(block))
  }

  fn shrink_in_place(
    &mut self,
    block: Block,
    asize: u32,
  ) {
    let region = &mut self.region;
    let old_size = block.size(region);
    let prev_allocated = block.is_prev_allocated(region);
    block.make_allocated(region, asize, prev_allocated);
    let rest = block.next(region);
    rest.make_free(region, old_size - asize, true);
    self.coalesce(rest);
  }

  /// Tries to grow `block` to `asize` bytes by absorbing the free block
  /// after it, extending the heap first when `block` sits at its end.
  fn grow_in_place(
    &mut self,
    block: Block,
    asize: u32,
  ) -> bool {
    let chunk = self.config.chunk_size();
    let old_size = block.size(&self.region);

    if block.is_last(&self.region) {
      if let Err(err) = self.extend_heap(((asize - old_size) as usize).max(chunk)) {
        log::debug!("cannot extend behind the last block: {err}");
        return false;
      }
    }

    let next = block.next(&self.region);
    if next.is_allocated(&self.region) {
      return false;
    }
    let mut next_size = next.size(&self.region);
    if next.is_last(&self.region) && old_size + next_size < asize {
      let shortfall = asize - old_size - next_size;
      if let Err(err) = self.extend_heap((shortfall as usize).max(chunk)) {
        log::debug!("cannot extend the trailing free block: {err}");
        return false;
      }
      next_size = next.size(&self.region);
    }

    let combined = old_size + next_size;
    if combined < asize {
      return false;
    }

    let region = &mut self.region;
    let prev_allocated = block.is_prev_allocated(region);
    self.free_list.remove(region, next);
    if combined - asize >= MIN_BLOCK_SIZE {
      block.make_allocated(region, asize, prev_allocated);
      let rest = block.next(region);
      rest.make_free(region, combined - asize, true);
      self.free_list.insert(region, rest);
    } else {
      block.make_allocated(region, combined, prev_allocated);
      block.next(region).set_prev_allocated(region, true);
    }
    true
  }
}

/// Region length from `base` up to the store's reported end `high`, at
/// least `at_least`, capped at what the 32-bit offsets can describe.
fn reported_len(
  base: NonNull<u8>,
  high: *mut u8,
  at_least: usize,
) -> u32 {
  let end = (high as usize)
    .saturating_sub(base.as_ptr() as usize)
    .max(at_least);
  u32::try_from(end).map_or(MAX_REGION, |end| end.min(MAX_REGION))
}

/// Block size needed for a `size`-byte payload: header included, rounded
/// up to the alignment unit, at least one unit. `None` if it does not fit
/// the size field.
fn adjusted_size(size: usize) -> Option<u32> {
  let padded = size.checked_add(WSIZE as usize + ALIGNMENT - 1)?;
  let asize = (padded & !(ALIGNMENT - 1)).max(MIN_BLOCK_SIZE as usize);
  u32::try_from(asize).ok().filter(|&asize| asize <= MAX_REGION)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{block::Header, store::ArenaStore};

  fn heap_with(
    capacity: usize,
    config: HeapConfig,
  ) -> Heap<ArenaStore> {
    Heap::new(ArenaStore::with_capacity(capacity), config).unwrap()
  }

  fn heap() -> Heap<ArenaStore> {
    heap_with(1 << 16, HeapConfig::default())
  }

  /// Rounds every request up to a multiple of `granule` bytes.
  struct RoundingStore {
    inner: ArenaStore,
    granule: usize,
  }

  impl BackingStore for RoundingStore {
    fn extend(
      &mut self,
      bytes: usize,
    ) -> Result<NonNull<u8>, StoreError> {
      self.inner.extend(bytes.div_ceil(self.granule) * self.granule)
    }

    fn region_bounds(&self) -> (*mut u8, *mut u8) {
      self.inner.region_bounds()
    }
  }

  fn assert_consistent<S: BackingStore>(heap: &Heap<S>) {
    let violations = heap.check_consistency(false);
    assert!(violations.is_empty(), "{violations:?}");
  }

  fn offset(
    heap: &Heap<ArenaStore>,
    ptr: *mut u8,
  ) -> u32 {
    heap.region.offset_of(ptr).unwrap()
  }

  #[test]
  fn test_adjusted_size() {
    assert_eq!(adjusted_size(1), Some(16));
    assert_eq!(adjusted_size(8), Some(16));
    assert_eq!(adjusted_size(12), Some(16));
    assert_eq!(adjusted_size(13), Some(32));
    assert_eq!(adjusted_size(28), Some(32));
    assert_eq!(adjusted_size(29), Some(48));
    assert_eq!(adjusted_size(100), Some(112));
    assert_eq!(adjusted_size(usize::MAX), None);
    assert_eq!(adjusted_size(u32::MAX as usize), None);
  }

  #[test]
  fn test_initial_layout() {
    let heap = heap();
    assert_eq!(heap.region.len(), 32 + 64);
    assert_eq!(heap.store().extend_calls(), 2);
    assert_eq!(heap.epilogue.offset(), 96);

    let blocks: Vec<_> = heap.free_list.iter(&heap.region).collect();
    assert_eq!(blocks, vec![FIRST_BLOCK]);
    assert_eq!(FIRST_BLOCK.size(&heap.region), 64);
    assert!(FIRST_BLOCK.is_prev_allocated(&heap.region));
    assert_consistent(&heap);
  }

  #[test]
  fn test_rounding_store_initial_layout() {
    let store = RoundingStore {
      inner: ArenaStore::with_capacity(1 << 16),
      granule: 64,
    };
    let heap = Heap::new(store, HeapConfig::default()).unwrap();
    // 64 bytes for the 32-byte header area, then 64 for the first chunk.
    assert_eq!(heap.region.len(), 128);
    assert_eq!(heap.store().inner.len(), 128);
    assert_eq!(FIRST_BLOCK.size(&heap.region), 96);
    assert_eq!(heap.epilogue.offset(), 128);
    assert_consistent(&heap);
  }

  #[test]
  fn test_rounding_store_workload() {
    for granule in [40, 64, 100] {
      let store = RoundingStore {
        inner: ArenaStore::with_capacity(1 << 16),
        granule,
      };
      let mut heap = Heap::new(store, HeapConfig::default()).unwrap();
      let mut live = Vec::new();
      for i in 1..60 {
        let ptr = heap.allocate(i * 5);
        assert!(!ptr.is_null(), "granule {granule}, step {i}");
        live.push(ptr);
        if i % 3 == 0 {
          let ptr = live.swap_remove(i % live.len());
          unsafe { heap.release(ptr) };
        }
        if i % 4 == 0 {
          let index = i % live.len();
          live[index] = unsafe { heap.reallocate(live[index], i * 11) };
          assert!(!live[index].is_null());
        }
        let violations = heap.check_consistency(false);
        assert!(violations.is_empty(), "granule {granule}, step {i}: {violations:?}");
        assert_eq!(heap.region.len() as usize, heap.store().inner.len());
      }
      for ptr in live {
        unsafe { heap.release(ptr) };
      }
      assert!(heap.check_consistency(false).is_empty());
      assert_eq!(heap.free_list.iter(&heap.region).count(), 1);
    }
  }

  #[test]
  fn test_allocate_zero_is_null() {
    let mut heap = heap();
    assert!(heap.allocate(0).is_null());
    assert_eq!(heap.store().extend_calls(), 2);
  }

  #[test]
  fn test_allocate_splits_and_aligns() {
    let mut heap = heap();
    let a = heap.allocate(1);
    let b = heap.allocate(20);

    assert_eq!(a as usize % ALIGNMENT, 0);
    assert_eq!(b as usize % ALIGNMENT, 0);
    assert_eq!(offset(&heap, a), 32);
    assert_eq!(offset(&heap, b), 48);
    assert_eq!(heap.usable_size(a), Some(12));
    assert_eq!(heap.usable_size(b), Some(28));
    assert_consistent(&heap);
  }

  #[test]
  fn test_exact_fit_takes_whole_block() {
    let mut heap = heap();
    // 64-byte chunk, 48-byte block: 16 left, which still forms a block.
    let a = heap.allocate(44);
    assert_eq!(heap.usable_size(a), Some(44));
    // A 16-byte block takes the remainder without a split.
    let b = heap.allocate(12);
    assert_eq!(offset(&heap, b), 80);
    assert_eq!(heap.free_list.iter(&heap.region).count(), 0);
    assert_consistent(&heap);
  }

  #[test]
  fn test_release_reuses_last_freed() {
    let mut heap = heap();
    let a = heap.allocate(100);
    let b = heap.allocate(100);
    unsafe { heap.release(a) };
    assert_consistent(&heap);

    let c = heap.allocate(100);
    assert_eq!(c, a);
    assert_ne!(c, b);
    assert_consistent(&heap);
  }

  #[test]
  fn test_reuse_without_growth() {
    let mut heap = heap();
    let a = heap.allocate(16);
    unsafe { heap.release(a) };
    let calls = heap.store().extend_calls();

    let b = heap.allocate(8);
    assert_eq!(b, a);
    assert_eq!(heap.store().extend_calls(), calls);
    assert_consistent(&heap);
  }

  #[test]
  fn test_coalesce_all_cases() {
    let mut heap = heap_with(1 << 16, HeapConfig::default().with_chunk_size(4096));
    let blocks: Vec<_> = (0..5).map(|_| heap.allocate(28)).collect();

    // Neither neighbour free.
    unsafe { heap.release(blocks[1]) };
    assert_consistent(&heap);
    // Previous neighbour free.
    unsafe { heap.release(blocks[2]) };
    assert_consistent(&heap);
    // Next neighbour free.
    unsafe { heap.release(blocks[0]) };
    assert_consistent(&heap);
    let merged = Block::at(offset(&heap, blocks[0]));
    assert_eq!(merged.size(&heap.region), 3 * 32);

    // Both neighbours free: the hole before and the tail after.
    unsafe { heap.release(blocks[4]) };
    unsafe { heap.release(blocks[3]) };
    assert_consistent(&heap);
    let free: Vec<_> = heap.free_list.iter(&heap.region).collect();
    assert_eq!(free, vec![FIRST_BLOCK]);
    assert_eq!(FIRST_BLOCK.size(&heap.region), 4096);
  }

  #[test]
  fn test_release_null_and_misuse() {
    let mut heap = heap();
    unsafe { heap.release(ptr::null_mut()) };
    assert!(unsafe { heap.try_release(ptr::null_mut()) }.is_ok());

    let a = heap.allocate(24);
    let b = heap.allocate(24);
    unsafe { heap.release(a) };
    let err = unsafe { heap.try_release(a) }.unwrap_err();
    assert!(matches!(err, ReleaseError::NotAllocated { .. }), "{err}");

    let err = unsafe { heap.try_release(b.wrapping_add(4)) }.unwrap_err();
    assert!(matches!(err, ReleaseError::Misaligned { .. }), "{err}");

    // A header whose size is not a multiple of the alignment unit, with a
    // plausible successor header inside the payload.
    let header = Block::at(offset(&heap, b)).header_offset();
    let saved = heap.region.get(header);
    heap.region.put(header, Header::new(24, true, true).to_raw());
    heap.region.put(header + 24, Header::new(16, true, true).to_raw());
    let err = unsafe { heap.try_release(b) }.unwrap_err();
    assert!(matches!(err, ReleaseError::BadSize { size: 24, .. }), "{err}");
    heap.region.put(header, saved);

    let mut outside = 0u8;
    let err = unsafe { heap.try_release(&raw mut outside) }.unwrap_err();
    assert!(matches!(err, ReleaseError::OutOfRegion { .. }), "{err}");

    // `release` ignores the double free instead of corrupting the list.
    unsafe { heap.release(a) };
    assert_eq!(heap.usable_size(b), Some(28));
    assert_eq!(heap.free_list.iter(&heap.region).count(), 1);
    assert_consistent(&heap);
  }

  #[test]
  fn test_first_fit_and_best_fit() {
    for fit in [FitPolicy::FirstFit, FitPolicy::BestFit] {
      let config = HeapConfig::default().with_fit(fit).with_chunk_size(4096);
      let mut heap = heap_with(1 << 16, config);
      let big = heap.allocate(60);
      let _guard1 = heap.allocate(1);
      let medium = heap.allocate(44);
      let _guard2 = heap.allocate(1);
      let small = heap.allocate(28);
      let _guard3 = heap.allocate(1);

      // List order afterwards: big, medium, small, tail.
      unsafe {
        heap.release(small);
        heap.release(medium);
        heap.release(big);
      }

      let got = heap.allocate(40);
      let expected = match fit {
        FitPolicy::FirstFit => big,
        FitPolicy::BestFit => medium,
      };
      assert_eq!(got, expected, "{fit:?}");
      assert_consistent(&heap);
    }
  }

  #[test]
  fn test_best_fit_prefers_exact() {
    let config = HeapConfig::default().with_fit(FitPolicy::BestFit).with_chunk_size(4096);
    let mut heap = heap_with(1 << 16, config);
    let a = heap.allocate(44);
    let _guard1 = heap.allocate(1);
    let b = heap.allocate(28);
    let _guard2 = heap.allocate(1);
    unsafe {
      heap.release(b);
      heap.release(a);
    }

    assert_eq!(heap.allocate(28), b);
    assert_consistent(&heap);
  }

  #[test]
  fn test_heap_growth_coalesces_with_free_tail() {
    let mut heap = heap();
    let a = heap.allocate(100);
    assert_eq!(offset(&heap, a), 32);
    // 64-byte initial chunk merged with a 112-byte extension.
    let tail = Block::at(32 + 112);
    assert_eq!(tail.size(&heap.region), 64);
    assert_eq!(heap.region.len(), 32 + 64 + 112);
    assert_consistent(&heap);
  }

  #[test]
  fn test_exhaustion_returns_null() {
    let mut heap = heap_with(256, HeapConfig::default());
    assert!(heap.allocate(1024).is_null());
    let a = heap.allocate(100);
    assert!(!a.is_null());
    assert_consistent(&heap);
  }

  #[test]
  fn test_allocate_zeroed() {
    let mut heap = heap();
    let a = heap.allocate(64);
    unsafe { ptr::write_bytes(a, 0xab, 64) };
    unsafe { heap.release(a) };

    let z = heap.allocate_zeroed(8, 8);
    assert_eq!(z, a);
    let bytes = unsafe { std::slice::from_raw_parts(z, 64) };
    assert!(bytes.iter().all(|&b| b == 0));

    assert!(heap.allocate_zeroed(usize::MAX, 2).is_null());
    assert!(heap.allocate_zeroed(0, 8).is_null());
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_edge_cases() {
    let mut heap = heap();
    let a = unsafe { heap.reallocate(ptr::null_mut(), 24) };
    assert!(!a.is_null());
    assert_eq!(heap.usable_size(a), Some(28));

    assert!(unsafe { heap.reallocate(a, 0) }.is_null());
    assert_eq!(heap.usable_size(a), None);
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_within_block() {
    let mut heap = heap();
    let a = heap.allocate(20);
    unsafe { ptr::write_bytes(a, 7, 20) };

    assert_eq!(unsafe { heap.reallocate(a, 28) }, a);
    assert_eq!(heap.usable_size(a), Some(28));
    let bytes = unsafe { std::slice::from_raw_parts(a, 20) };
    assert!(bytes.iter().all(|&b| b == 7));
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_shrinks_in_place() {
    let mut heap = heap_with(1 << 16, HeapConfig::default().with_chunk_size(4096));
    let a = heap.allocate(200);
    let _guard = heap.allocate(1);
    unsafe { ptr::write_bytes(a, 3, 200) };

    assert_eq!(unsafe { heap.reallocate(a, 20) }, a);
    assert_eq!(heap.usable_size(a), Some(28));
    let bytes = unsafe { std::slice::from_raw_parts(a, 20) };
    assert!(bytes.iter().all(|&b| b == 3));

    let hole = Block::at(offset(&heap, a) + 32);
    assert!(!hole.is_allocated(&heap.region));
    assert_eq!(hole.size(&heap.region), 208 - 32);
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_absorbs_next_free_block() {
    let mut heap = heap_with(1 << 16, HeapConfig::default().with_chunk_size(4096));
    let a = heap.allocate(28);
    let b = heap.allocate(60);
    let _guard = heap.allocate(1);
    unsafe { ptr::write_bytes(a, 9, 28) };
    unsafe { heap.release(b) };

    // Merge with split: 32 + 64 = 96 >= 48 + 16.
    assert_eq!(unsafe { heap.reallocate(a, 40) }, a);
    assert_eq!(heap.usable_size(a), Some(44));
    assert_consistent(&heap);

    // Merge without split: the remaining 48 bytes fit exactly.
    assert_eq!(unsafe { heap.reallocate(a, 88) }, a);
    assert_eq!(heap.usable_size(a), Some(92));
    let bytes = unsafe { std::slice::from_raw_parts(a, 28) };
    assert!(bytes.iter().all(|&b| b == 9));
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_last_block_extends_heap() {
    let mut heap = heap();
    let a = heap.allocate(60);
    assert!(!a.is_null());
    assert!(Block::at(offset(&heap, a)).is_last(&heap.region));

    let b = unsafe { heap.reallocate(a, 500) };
    assert_eq!(b, a);
    assert!(heap.usable_size(a).unwrap() >= 500);
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_moves_and_preserves_data() {
    let mut heap = heap();
    let a = heap.allocate(24);
    let _guard = heap.allocate(24);
    for i in 0..24 {
      unsafe { a.add(i).write(i as u8) };
    }

    let b = unsafe { heap.reallocate(a, 300) };
    assert_ne!(b, a);
    for i in 0..24 {
      assert_eq!(unsafe { b.add(i).read() }, i as u8);
    }
    assert_eq!(heap.usable_size(a), None);
    assert_consistent(&heap);
  }

  #[test]
  fn test_reallocate_failure_keeps_block() {
    let mut heap = heap_with(256, HeapConfig::default());
    let a = heap.allocate(24);
    let _guard = heap.allocate(24);
    unsafe { ptr::write_bytes(a, 5, 24) };

    assert!(unsafe { heap.reallocate(a, 4096) }.is_null());
    assert_eq!(heap.usable_size(a), Some(28));
    let bytes = unsafe { std::slice::from_raw_parts(a, 24) };
    assert!(bytes.iter().all(|&b| b == 5));
    assert_consistent(&heap);
  }

  #[test]
  fn test_misaligned_store_is_rejected() {
    let mut store = ArenaStore::with_capacity(256);
    store.extend(8).unwrap();
    let err = Heap::new(store, HeapConfig::default()).err().unwrap();
    assert!(matches!(err, InitError::MisalignedBase { .. }), "{err}");
  }

  #[test]
  fn test_store_too_small_for_first_chunk() {
    let err = Heap::new(ArenaStore::with_capacity(64), HeapConfig::default())
      .err()
      .unwrap();
    assert!(matches!(err, InitError::Store { .. }), "{err}");
  }
}
