//! Chunk planning: pure computation of the next paged request.
//!
//! The server pages by `(chunk index, chunk size)`, not by absolute row
//! offset. After a restart or a throttling-induced shrink, the number of
//! rows already written rarely falls on a chunk boundary, so the planner
//! requests the chunk that encloses the next needed row and tells the
//! caller how many leading data rows of the response to discard.

use tracing::debug;

/// The next request to issue for a target, as computed by [`plan_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Zero-based chunk index to request.
    pub chunk_index: u64,
    /// Leading data rows of the response that were already written.
    pub skip_rows: u64,
    /// Chunk size to use for this request. May be smaller than the
    /// configured size when fewer rows than one chunk remain.
    pub chunk_size: u64,
}

/// Computes the next chunk to request for a target with `done` of `total`
/// rows written, paging with `chunk_size` rows per chunk.
///
/// The returned [`ChunkPlan::chunk_size`] applies to this request only;
/// the caller's configured size is not changed by the narrowing of a
/// final partial read.
///
/// Ordering caveat: correctness of the skip count assumes the server
/// returns rows in a stable order across paginated requests for the same
/// `filter`/`order`. The wire contract does not promise this; if the
/// ordering is unstable under a filter, resumed output may drop or
/// duplicate rows near the resume point.
#[must_use]
pub fn plan_chunk(done: u64, total: u64, chunk_size: u64) -> ChunkPlan {
    let mut chunk_size = chunk_size;

    // When the remaining rows fit in less than one chunk, request only
    // the remainder so nothing past the final row has to be discarded.
    let remaining = total.saturating_sub(done);
    if remaining > 0 && remaining < chunk_size {
        chunk_size = remaining;
    }

    if done == 0 {
        return ChunkPlan {
            chunk_index: 0,
            skip_rows: 0,
            chunk_size,
        };
    }

    if chunk_size < 1 {
        chunk_size = 1;
    }

    let mut skip_rows = done % chunk_size;
    let chunk_index = done / chunk_size;

    // All rows already written: request one row and discard it. The
    // chunk index keeps the pre-override size so the request stays
    // inside the valid chunk range.
    if done == total {
        skip_rows = 1;
        chunk_size = 1;
    }

    debug!(done, total, chunk_index, skip_rows, chunk_size, "planned next chunk");

    ChunkPlan {
        chunk_index,
        skip_rows,
        chunk_size,
    }
}
