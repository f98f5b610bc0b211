//! # tagalloc - A Boundary-Tag Memory Allocator
//!
//! This crate provides a general-purpose allocator with `allocate`, `release`,
//! `reallocate` and `allocate_zeroed` over a single contiguous region that only
//! ever grows, such as the program break managed through `sbrk(2)`.
//!
//! ## Overview
//!
//! The region is carved into blocks. Each block starts with a one-word
//! header; free blocks also end with a footer and are linked into an explicit
//! free list:
//!
//! ```text
//!   Heap Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ sentinel │ prologue │  A1  │ free │  A2  │  A3  │    free     │ epi   │
//!   └──────────────────────────────────────────────────────────────────────┘
//!        │                         ▲                        ▲
//!        └─── free list ───────────┴────────────────────────┘
//!
//!   - Allocation: search the free list, split the block if worthwhile.
//!   - Release: merge with free neighbours in O(1), push on the free list.
//!   - Out of space: ask the backing store for more and merge it in.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Header word encoding and block arithmetic
//!   ├── region     - Offset-addressed access to the managed bytes (internal)
//!   ├── free_list  - Sentinel-anchored explicit free list (internal)
//!   ├── heap       - Heap: allocate / release / reallocate / allocate_zeroed
//!   ├── check      - Heap consistency checker
//!   ├── store      - BackingStore trait, SbrkStore, ArenaStore
//!   ├── config     - HeapConfig, FitPolicy
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{ArenaStore, Heap, HeapConfig};
//!
//! let mut heap = Heap::new(ArenaStore::with_capacity(64 * 1024), HeapConfig::default())?;
//!
//! let ptr = heap.allocate(100);
//! assert!(!ptr.is_null());
//! unsafe {
//!   ptr.write_bytes(0x2a, 100);
//!   let ptr = heap.reallocate(ptr, 400);
//!   assert_eq!(ptr.read(), 0x2a);
//!   heap.release(ptr);
//! }
//!
//! assert!(heap.check_consistency(false).is_empty());
//! # Ok::<(), tagalloc::InitError>(())
//! ```
//!
//! ## Block Format
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │   Header (4 bytes)    │         Payload                │
//!   │  size | prev | alloc  │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user (16-byte aligned)
//! ```
//!
//! The header records whether the physically preceding block is allocated,
//! so allocated blocks need no footer and a release can tell in constant
//! time whether it may merge backwards. Free-list links are 32-bit offsets
//! from the region base, which keeps the smallest block at 16 bytes.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **No compaction**: Blocks never move once allocated
//! - **No shrinking**: Memory is never handed back to the backing store
//! - **4 GiB region**: Offsets and sizes are stored in 32 bits
//!
//! ## Safety
//!
//! Releasing and reallocating take raw addresses and are `unsafe`: the
//! heap can catch some misuse (see [`Heap::try_release`]) but not all of it.

pub mod align;
pub mod block;
mod check;
mod config;
mod error;
mod free_list;
mod heap;
mod region;
mod store;

pub use check::Violation;
pub use config::{DEFAULT_CHUNK_SIZE, FitPolicy, HeapConfig};
pub use error::{InitError, ReleaseError, StoreError};
pub use heap::Heap;
pub use store::{ArenaStore, BackingStore, SbrkStore};
