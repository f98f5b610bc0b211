//! Heap consistency checker.
//!
//! Walks the physical block chain from the first block to the epilogue, then
//! the free list from the sentinel, and reports every broken invariant it
//! can see instead of stopping at the first one. Meant for tests and
//! debugging; nothing on the allocation path depends on it.

use std::collections::BTreeSet;

use snafu::Snafu;

use crate::{
  block::{ALIGNMENT, Block, DSIZE, Header, MIN_BLOCK_SIZE, WSIZE},
  heap::{FIRST_BLOCK, Heap},
  store::BackingStore,
};

/// A broken heap invariant, located by block offset from the region base.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum Violation {
  #[snafu(display("sentinel header is {raw:#x}"))]
  CorruptSentinel { raw: u32 },
  #[snafu(display("prologue header is {raw:#x}"))]
  CorruptPrologue { raw: u32 },
  #[snafu(display("block {offset:#x} runs past the epilogue"))]
  OutOfBounds { offset: u32 },
  #[snafu(display("block {offset:#x} has invalid size {size}"))]
  BadSize { offset: u32, size: u32 },
  #[snafu(display("block {offset:#x} and the block before it are both free"))]
  AdjacentFree { offset: u32 },
  #[snafu(display("block {offset:#x} records prev-allocated {recorded}, but it is {actual}"))]
  PrevAllocatedMismatch {
    offset: u32,
    recorded: bool,
    actual: bool,
  },
  #[snafu(display("free block {offset:#x} has header {header:#x} but footer {footer:#x}"))]
  FooterMismatch {
    offset: u32,
    header: u32,
    footer: u32,
  },
  #[snafu(display("epilogue at {offset:#x} is {raw:#x}, expected at {expected:#x}"))]
  BadEpilogue {
    offset: u32,
    raw: u32,
    expected: u32,
  },
  #[snafu(display("allocated block {offset:#x} is on the free list"))]
  ListedAllocated { offset: u32 },
  #[snafu(display("free list links to {offset:#x}, which is not a block"))]
  DanglingLink { offset: u32 },
  #[snafu(display("free list links around {offset:#x} do not point back"))]
  BrokenLink { offset: u32 },
  #[snafu(display("free block {offset:#x} appears on the free list twice"))]
  ListedTwice { offset: u32 },
  #[snafu(display("free block {offset:#x} is missing from the free list"))]
  Unlisted { offset: u32 },
}

impl<S: BackingStore> Heap<S> {
  /// Verifies every heap invariant and returns what is broken. With
  /// `verbose`, every block and free-list node is logged at debug level.
  pub fn check_consistency(
    &self,
    verbose: bool,
  ) -> Vec<Violation> {
    let mut violations = Vec::new();
    let (free, allocated) = self.check_blocks(verbose, &mut violations);
    self.check_free_list(verbose, &free, &allocated, &mut violations);

    for violation in &violations {
      log::debug!("heap check: {violation}");
    }
    violations
  }

  /// Walks the block chain; returns the offsets of free and allocated blocks.
  fn check_blocks(
    &self,
    verbose: bool,
    violations: &mut Vec<Violation>,
  ) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let region = &self.region;
    let mut free = BTreeSet::new();
    let mut allocated = BTreeSet::new();

    let sentinel = self.free_list.sentinel();
    let raw = region.get(sentinel.header_offset());
    if raw != Header::new(MIN_BLOCK_SIZE, false, true).to_raw()
      || region.get(sentinel.offset() + MIN_BLOCK_SIZE - DSIZE) != raw
    {
      violations.push(Violation::CorruptSentinel { raw });
    }
    let raw = region.get(FIRST_BLOCK.offset() - DSIZE - WSIZE);
    if raw != Header::new(DSIZE, true, true).to_raw() {
      violations.push(Violation::CorruptPrologue { raw });
    }
    if verbose {
      log::debug!(
        "[SEN] {:#08x} next {:#08x} prev {:#08x}",
        sentinel.offset(),
        self.free_list.next(region, sentinel).offset(),
        self.free_list.prev(region, sentinel).offset(),
      );
      log::debug!("[PRO] {:#08x} size {DSIZE}", FIRST_BLOCK.offset() - DSIZE);
    }

    let end = self.epilogue.offset();
    let mut prev_allocated = true;
    let mut block = FIRST_BLOCK;
    let mut index = 0;
    loop {
      let offset = block.offset();
      if offset > end {
        violations.push(Violation::OutOfBounds { offset });
        break;
      }
      let header = block.header(region);
      let size = header.size();

      if size == 0 {
        if offset != end || !header.is_allocated() {
          violations.push(Violation::BadEpilogue {
            offset,
            raw: header.to_raw(),
            expected: end,
          });
        } else if header.is_prev_allocated() != prev_allocated {
          violations.push(Violation::PrevAllocatedMismatch {
            offset,
            recorded: header.is_prev_allocated(),
            actual: prev_allocated,
          });
        }
        if verbose {
          log::debug!("[EPI] {offset:#08x}");
        }
        break;
      }
      if size < MIN_BLOCK_SIZE || size as usize % ALIGNMENT != 0 {
        violations.push(Violation::BadSize { offset, size });
        break;
      }
      if size > end - offset {
        violations.push(Violation::OutOfBounds { offset });
        break;
      }

      if header.is_prev_allocated() != prev_allocated {
        violations.push(Violation::PrevAllocatedMismatch {
          offset,
          recorded: header.is_prev_allocated(),
          actual: prev_allocated,
        });
      }
      if header.is_allocated() {
        allocated.insert(offset);
      } else {
        let footer = block.footer(region);
        if footer != header {
          violations.push(Violation::FooterMismatch {
            offset,
            header: header.to_raw(),
            footer: footer.to_raw(),
          });
        }
        if !prev_allocated {
          violations.push(Violation::AdjacentFree { offset });
        }
        free.insert(offset);
      }

      if verbose {
        log::debug!(
          "[{index:3}] {offset:#08x} size {size:6} {:5} {}",
          if header.is_allocated() { "ALLOC" } else { "FREE" },
          if header.is_prev_allocated() { "PREV_ALLOC" } else { "PREV_FREE" },
        );
      }

      prev_allocated = header.is_allocated();
      block = Block::at(offset + size);
      index += 1;
    }

    (free, allocated)
  }

  fn check_free_list(
    &self,
    verbose: bool,
    free: &BTreeSet<u32>,
    allocated: &BTreeSet<u32>,
    violations: &mut Vec<Violation>,
  ) {
    let region = &self.region;
    let list = &self.free_list;
    let sentinel = list.sentinel();
    let mut listed = BTreeSet::new();

    let mut current = sentinel;
    loop {
      let next = list.next(region, current);
      if next != sentinel {
        let offset = next.offset();
        if allocated.contains(&offset) {
          violations.push(Violation::ListedAllocated { offset });
          break;
        }
        if !free.contains(&offset) {
          violations.push(Violation::DanglingLink { offset });
          break;
        }
      }
      if list.prev(region, next) != current {
        violations.push(Violation::BrokenLink {
          offset: next.offset(),
        });
      }
      if next == sentinel {
        break;
      }
      if !listed.insert(next.offset()) {
        violations.push(Violation::ListedTwice {
          offset: next.offset(),
        });
        break;
      }
      if verbose {
        log::debug!(
          "[FREE] {:#08x} next {:#08x} prev {:#08x}",
          next.offset(),
          list.next(region, next).offset(),
          list.prev(region, next).offset(),
        );
      }
      current = next;
    }

    for &offset in free.difference(&listed) {
      violations.push(Violation::Unlisted { offset });
    }
  }
}
