//! Chunk planning — derives a chunk size from the bandwidth estimate.
//!
//! Small chunks bound the cost of a dropped connection (retransmit at most
//! one chunk); large chunks amortize per-request overhead on fast links.
//! Pure and deterministic given its inputs, so plans are reproducible in
//! tests and fixed for a job's lifetime once persisted.

/// 5 MiB — slow links (< 2 Mbps), roughly 40 seconds per chunk on 2G/3G.
pub const CHUNK_SIZE_MIN: i64 = 5 * 1024 * 1024;

/// 25 MiB — mid-band links (2–10 Mbps).
pub const CHUNK_SIZE_MID: i64 = 25 * 1024 * 1024;

/// 100 MiB — broadband (> 10 Mbps).
pub const CHUNK_SIZE_MAX: i64 = 100 * 1024 * 1024;

/// A chunking decision, fixed at enqueue time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: i64,
    pub chunk_count: u32,
}

/// Plan chunking for a file of `file_size` bytes at the given bandwidth.
///
/// `chunk_count` is `ceil(file_size / chunk_size)`; a zero-byte file plans
/// zero chunks and goes straight from initiate to complete.
pub fn plan(file_size: i64, bandwidth_mbps: f64) -> ChunkPlan {
    let chunk_size = if bandwidth_mbps < 2.0 {
        CHUNK_SIZE_MIN
    } else if bandwidth_mbps < 10.0 {
        CHUNK_SIZE_MID
    } else {
        CHUNK_SIZE_MAX
    };

    let chunk_count = (file_size.max(0) as u64).div_ceil(chunk_size as u64) as u32;

    ChunkPlan {
        chunk_size,
        chunk_count,
    }
}
