//! Block layout: packed header words and boundary-tag arithmetic.
//!
//! ```text
//!   Allocated block:                 Free block:
//!   ┌────────┬──────────────────┐    ┌────────┬──────┬──────┬─────┬────────┐
//!   │ header │     payload      │    │ header │ next │ prev │ ... │ footer │
//!   └────────┴──────────────────┘    └────────┴──────┴──────┴─────┴────────┘
//!     4 bytes ▲                        4 bytes ▲  4      4            4
//!             └── block offset                 └── block offset
//! ```
//!
//! A block is identified by the offset of its payload. The header sits in
//! the word right before it, so payloads stay 16-byte aligned while headers
//! sit at `16k + 12`. Only free blocks carry a footer; allocated blocks give
//! that word to the payload, which is possible because every header records
//! whether its physical predecessor is allocated.

use crate::region::Region;

/// Size of a header, footer or free-list link in bytes.
pub const WSIZE: u32 = 4;
/// Two words: header plus footer.
pub const DSIZE: u32 = 8;
/// Alignment of every payload and granularity of every block size.
pub const ALIGNMENT: usize = 16;
/// Header, two links and a footer.
pub const MIN_BLOCK_SIZE: u32 = ALIGNMENT as u32;

const ALLOCATED_BIT: u32 = 0b001;
const PREV_ALLOCATED_BIT: u32 = 0b010;
const FLAG_MASK: u32 = 0b111;

/// A packed header or footer word.
///
/// Bit 0 holds the allocated flag, bit 1 the prev-allocated flag, bit 2 is
/// reserved. The remaining bits hold the block size, which is always a
/// multiple of 16 and therefore never overlaps the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(u32);

impl Header {
  pub const fn new(
    size: u32,
    allocated: bool,
    prev_allocated: bool,
  ) -> Self {
    debug_assert!(size & FLAG_MASK == 0);
    let mut raw = size;
    if allocated {
      raw |= ALLOCATED_BIT;
    }
    if prev_allocated {
      raw |= PREV_ALLOCATED_BIT;
    }
    Self(raw)
  }

  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  pub const fn to_raw(self) -> u32 {
    self.0
  }

  pub const fn size(self) -> u32 {
    self.0 & !FLAG_MASK
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED_BIT != 0
  }

  pub const fn is_prev_allocated(self) -> bool {
    self.0 & PREV_ALLOCATED_BIT != 0
  }

  #[must_use]
  pub const fn with_prev_allocated(
    self,
    prev_allocated: bool,
  ) -> Self {
    Self::new(self.size(), self.is_allocated(), prev_allocated)
  }
}

/// Handle to a block: the region offset of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Block(u32);

impl Block {
  pub(crate) const fn at(offset: u32) -> Self {
    Self(offset)
  }

  pub(crate) const fn offset(self) -> u32 {
    self.0
  }

  pub(crate) const fn header_offset(self) -> u32 {
    self.0 - WSIZE
  }

  pub(crate) fn header(
    self,
    region: &Region,
  ) -> Header {
    Header::from_raw(region.get(self.header_offset()))
  }

  /// Offset of the footer word, derived from the size in the header.
  pub(crate) fn footer_offset(
    self,
    region: &Region,
  ) -> u32 {
    self.0 + self.size(region) - DSIZE
  }

  pub(crate) fn footer(
    self,
    region: &Region,
  ) -> Header {
    Header::from_raw(region.get(self.footer_offset(region)))
  }

  pub(crate) fn size(
    self,
    region: &Region,
  ) -> u32 {
    self.header(region).size()
  }

  pub(crate) fn is_allocated(
    self,
    region: &Region,
  ) -> bool {
    self.header(region).is_allocated()
  }

  pub(crate) fn is_prev_allocated(
    self,
    region: &Region,
  ) -> bool {
    self.header(region).is_prev_allocated()
  }

  /// The physically following block. Must not be called on the epilogue.
  pub(crate) fn next(
    self,
    region: &Region,
  ) -> Self {
    let size = self.size(region);
    debug_assert!(size > 0, "next() called on the epilogue");
    Self(self.0 + size)
  }

  /// The physically preceding block, found through its footer. Only valid
  /// while that block is free.
  pub(crate) fn prev(
    self,
    region: &Region,
  ) -> Self {
    debug_assert!(!self.is_prev_allocated(region));
    let prev_footer = Header::from_raw(region.get(self.0 - DSIZE));
    Self(self.0 - prev_footer.size())
  }

  /// Whether the following block is the epilogue.
  pub(crate) fn is_last(
    self,
    region: &Region,
  ) -> bool {
    self.next(region).size(region) == 0
  }

  /// Writes matching header and footer for a free block of `size` bytes.
  pub(crate) fn make_free(
    self,
    region: &mut Region,
    size: u32,
    prev_allocated: bool,
  ) {
    let tag = Header::new(size, false, prev_allocated).to_raw();
    region.put(self.header_offset(), tag);
    region.put(self.0 + size - DSIZE, tag);
  }

  /// Writes the header of an allocated block; allocated blocks have no footer.
  pub(crate) fn make_allocated(
    self,
    region: &mut Region,
    size: u32,
    prev_allocated: bool,
  ) {
    region.put(
      self.header_offset(),
      Header::new(size, true, prev_allocated).to_raw(),
    );
  }

  /// Updates the prev-allocated bit in the header only. Free blocks keep
  /// their footer in sync because every path that frees a block rewrites it.
  pub(crate) fn set_prev_allocated(
    self,
    region: &mut Region,
    prev_allocated: bool,
  ) {
    let header = self.header(region).with_prev_allocated(prev_allocated);
    region.put(self.header_offset(), header.to_raw());
  }
}
