//! Batch scheduling under memory pressure.
//!
//! Chunks of a chapter are grouped into contiguous batches whose size follows
//! available system memory. Between batches the driver pauses and asks the
//! backend to release cached state.

use log::debug;
use std::ops::Range;
use std::time::Duration;
use sysinfo::System;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of the available-memory figure.
pub trait MemoryProbe: Send + Sync {
    /// Currently available memory in bytes, or `None` when it cannot be determined.
    fn available_bytes(&self) -> Option<u64>;
}

/// Host memory as reported by the operating system.
#[derive(Debug, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();
        match system.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// A probe that always reports the same figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub Option<u64>);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        self.0
    }
}

/// Scheduling knobs, fixed for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub max_batch_size: usize,
    /// Estimated memory one chunk needs, in MB
    pub memory_per_chunk_mb: u64,
    /// Recovery pause between batches
    pub pause: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            memory_per_chunk_mb: 50,
            pause: Duration::from_millis(2000),
        }
    }
}

/// `min(max_batch_size, max(1, available / memory_per_chunk))`.
///
/// Unknown memory, or a zero per-chunk estimate, falls back to `max_batch_size`.
pub fn chunks_per_batch(
    available_bytes: Option<u64>,
    max_batch_size: usize,
    memory_per_chunk_mb: u64,
) -> usize {
    let max_batch_size = max_batch_size.max(1);
    let per_chunk_bytes = memory_per_chunk_mb.saturating_mul(BYTES_PER_MB);

    match available_bytes {
        Some(available) if per_chunk_bytes > 0 => {
            let fits = (available / per_chunk_bytes).max(1);
            usize::try_from(fits).map_or(max_batch_size, |fits| fits.min(max_batch_size))
        }
        _ => max_batch_size,
    }
}

/// Contiguous batches covering `0..chunk_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub chunks_per_batch: usize,
    pub batches: Vec<Range<usize>>,
}

impl BatchPlan {
    pub fn new(chunk_count: usize, chunks_per_batch: usize) -> Self {
        let chunks_per_batch = chunks_per_batch.max(1);
        let batches = (0..chunk_count)
            .step_by(chunks_per_batch)
            .map(|start| start..(start + chunks_per_batch).min(chunk_count))
            .collect();

        Self {
            chunks_per_batch,
            batches,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Whether a recovery pause follows the batch at `batch_index`.
    pub fn recovery_after(&self, batch_index: usize) -> bool {
        batch_index + 1 < self.batches.len()
    }
}

/// Plans batches for one chapter at a time.
pub struct BatchScheduler {
    policy: BatchPolicy,
    probe: Box<dyn MemoryProbe>,
}

impl BatchScheduler {
    pub fn new(policy: BatchPolicy, probe: Box<dyn MemoryProbe>) -> Self {
        Self { policy, probe }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// Plan a chapter of `chunk_count` chunks. Memory is probed once per call.
    pub fn plan(&self, chunk_count: usize) -> BatchPlan {
        let available = self.probe.available_bytes();
        let size = chunks_per_batch(
            available,
            self.policy.max_batch_size,
            self.policy.memory_per_chunk_mb,
        );

        match available {
            Some(bytes) => debug!(
                "{} MB available, {} chunks per batch",
                bytes / BYTES_PER_MB,
                size
            ),
            None => debug!("Available memory unknown, using batch size {}", size),
        }

        BatchPlan::new(chunk_count, size)
    }
}
