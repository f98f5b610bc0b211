use snafu::{Location, Snafu};

/// Failures reported by a [`BackingStore`](crate::store::BackingStore).
#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum StoreError {
  #[snafu(display("backing store cannot grow by {requested} bytes"))]
  Exhausted {
    requested: usize,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("backing store grew at {actual:#x}, expected contiguous growth at {expected:#x}"))]
  NonContiguous {
    expected: usize,
    actual: usize,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("growing by {requested} bytes would push the region past 32-bit offsets"))]
  OffsetOverflow {
    requested: usize,
    #[snafu(implicit)]
    location: Location,
  },
}

/// Failures while laying out a fresh heap.
#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum InitError {
  #[snafu(display("failed to obtain the initial heap region"))]
  Store {
    source: StoreError,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("region base {base:#x} is not aligned to 16 bytes"))]
  MisalignedBase {
    base: usize,
    #[snafu(implicit)]
    location: Location,
  },
}

/// Caller misuse detected while releasing a block.
#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum ReleaseError {
  #[snafu(display("address {addr:#x} is not inside the heap"))]
  OutOfRegion {
    addr: usize,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("address {addr:#x} is not a payload address"))]
  Misaligned {
    addr: usize,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("block at {addr:#x} is not allocated (double free?)"))]
  NotAllocated {
    addr: usize,
    #[snafu(implicit)]
    location: Location,
  },
  #[snafu(display("block at {addr:#x} has a corrupt size {size}"))]
  BadSize {
    addr: usize,
    size: u32,
    #[snafu(implicit)]
    location: Location,
  },
}
