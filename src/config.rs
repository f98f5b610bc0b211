use crate::block::ALIGNMENT;

/// Reference heap growth granularity in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 6;
const MAX_CHUNK_SIZE: usize = 1 << 31;

/// How a free block is picked for an allocation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FitPolicy {
  /// First block in free-list order that is large enough.
  #[default]
  FirstFit,
  /// Smallest block that is large enough; ties go to the one found first.
  BestFit,
}

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  fit: FitPolicy,
  chunk_size: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      fit: FitPolicy::default(),
      chunk_size: DEFAULT_CHUNK_SIZE,
    }
  }
}

impl HeapConfig {
  #[must_use]
  pub fn with_fit(
    mut self,
    fit: FitPolicy,
  ) -> Self {
    self.fit = fit;
    self
  }

  /// Sets the minimum number of bytes requested from the backing store per
  /// extension. Rounded up to the alignment unit and capped at 2 GiB.
  #[must_use]
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = crate::align!(chunk_size.clamp(ALIGNMENT, MAX_CHUNK_SIZE));
    self
  }

  pub fn fit(&self) -> FitPolicy {
    self.fit
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }
}
