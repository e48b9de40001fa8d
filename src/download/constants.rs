//! Constants for the download module (chunk sizing, backoff, reporting).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP request timeout (5 minutes; chunks can be large).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of rows requested per chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// Smallest chunk size the server accepts.
pub const MIN_CHUNK_SIZE: u64 = 1;

/// Largest chunk size the server accepts.
pub const MAX_CHUNK_SIZE: u64 = 10_000;

/// Chunk size used after the first throttle shrink from the maximum.
pub const FIRST_SHRINK_CHUNK_SIZE: u64 = 7_000;

/// Step subtracted on every subsequent throttle shrink.
pub const SHRINK_STEP: u64 = 1_000;

/// Throttling never shrinks the chunk size below this.
pub const SHRINK_FLOOR: u64 = 1_000;

/// Consecutive gateway timeouts tolerated before shrinking the chunk size.
pub const TIMEOUTS_BEFORE_SHRINK: u32 = 3;

/// Transport-level fetch attempts per chunk before giving up.
pub const FETCH_ATTEMPTS: u32 = 5;

/// Pause between transport-level fetch retries.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Transport-level attempts for the total-count probe.
pub const PROBE_ATTEMPTS: u32 = 5;

/// Pause between total-count probe retries.
pub const PROBE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Sleep after a throttled (429/504/5xx) total-count probe response.
pub const PROBE_THROTTLE_DELAY: Duration = Duration::from_secs(5);

/// Sleep after a throttled (429/504/5xx) chunk response.
pub const THROTTLE_DELAY: Duration = Duration::from_secs(30);

/// Interval between progress snapshots.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Milliseconds factor scaling the smoothed speed estimate into an ETA.
pub const ETA_FACTOR_MS: u64 = 175;

/// Smoothing factor for the seconds-per-1000-rows moving average.
pub const SPEED_SMOOTHING: f64 = 0.005;
