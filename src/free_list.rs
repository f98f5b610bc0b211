//! Explicit free list.
//!
//! All free blocks are threaded onto a circular doubly-linked list anchored
//! by a sentinel block that lives in front of the prologue. Each free block
//! stores its links in the first two payload words as region offsets:
//!
//! ```text
//!   ┌──────────┐    ┌──────────┐    ┌──────────┐
//!   │ sentinel │───▶│  free A  │───▶│  free B  │───┐
//!   │          │◀───│          │◀───│          │   │
//!   └──────────┘    └──────────┘    └──────────┘   │
//!        ▲                                         │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! Blocks are inserted right after the sentinel, so the most recently freed
//! block is the first one a fit search sees.

use crate::{
  block::{Block, Header, MIN_BLOCK_SIZE, WSIZE},
  region::Region,
};

pub(crate) struct FreeList {
  sentinel: Block,
}

impl FreeList {
  /// Lays out the sentinel at `sentinel` and makes it point to itself.
  pub(crate) fn init(
    region: &mut Region,
    sentinel: Block,
  ) -> Self {
    let tag = Header::new(MIN_BLOCK_SIZE, false, true).to_raw();
    region.put(sentinel.header_offset(), tag);
    region.put(sentinel.footer_offset(region), tag);

    let list = Self { sentinel };
    list.set_next(region, sentinel, sentinel);
    list.set_prev(region, sentinel, sentinel);
    list
  }

  pub(crate) fn sentinel(&self) -> Block {
    self.sentinel
  }

  pub(crate) fn next(
    &self,
    region: &Region,
    block: Block,
  ) -> Block {
    Block::at(region.get(block.offset()))
  }

  pub(crate) fn prev(
    &self,
    region: &Region,
    block: Block,
  ) -> Block {
    Block::at(region.get(block.offset() + WSIZE))
  }

  fn set_next(
    &self,
    region: &mut Region,
    block: Block,
    next: Block,
  ) {
    region.put(block.offset(), next.offset());
  }

  fn set_prev(
    &self,
    region: &mut Region,
    block: Block,
    prev: Block,
  ) {
    region.put(block.offset() + WSIZE, prev.offset());
  }

  /// Links `block` in right after the sentinel. The block must already be
  /// tagged free and must not be on the list.
  pub(crate) fn insert(
    &self,
    region: &mut Region,
    block: Block,
  ) {
    let first = self.next(region, self.sentinel);
    self.set_next(region, block, first);
    self.set_prev(region, block, self.sentinel);
    self.set_next(region, self.sentinel, block);
    self.set_prev(region, first, block);
  }

  /// Unlinks `block`, which must currently be on the list.
  pub(crate) fn remove(
    &self,
    region: &mut Region,
    block: Block,
  ) {
    debug_assert_ne!(block, self.sentinel, "the sentinel is never removed");
    let prev = self.prev(region, block);
    let next = self.next(region, block);
    self.set_next(region, prev, next);
    self.set_prev(region, next, prev);
  }

  /// Free blocks in list order, sentinel excluded.
  pub(crate) fn iter<'a>(
    &self,
    region: &'a Region,
  ) -> FreeBlocks<'a> {
    FreeBlocks {
      region,
      sentinel: self.sentinel,
      current: Block::at(region.get(self.sentinel.offset())),
    }
  }
}

pub(crate) struct FreeBlocks<'a> {
  region: &'a Region,
  sentinel: Block,
  current: Block,
}

impl Iterator for FreeBlocks<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current == self.sentinel {
      return None;
    }
    let block = self.current;
    self.current = Block::at(self.region.get(block.offset()));
    Some(block)
  }
}
