//! Resource bounds and tunables for the engine.

use std::time::Duration;

/// One filesystem block read per file per tick.
pub const NETWORK_BLOCK: usize = 8 * 1024;

/// Per-session read and write buffer capacity.
pub const SESSION_BUFFER_CAPACITY: usize = 4 * 1024 * 1024;

/// At most this many paths are `fstat`-checked per tick.
pub const STAT_QUEUE_BATCH: usize = 50;

/// Client-side concurrent `STREAM` request limit.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 1;

/// Fixed client reconnect backoff.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Event loop readiness-wait cadence.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// A subscriber's write buffer must have at least `bytes + this` free space
/// to receive a pending append block.
pub const APPEND_WRITE_MARGIN: usize = 256;

/// A download's session write buffer must have at least this much free
/// space (`2 * block_size`) to receive the next catch-up block.
pub const DOWNLOAD_WRITE_MARGIN: usize = 2 * NETWORK_BLOCK;

/// A session's read buffer must retain at least this much free space to
/// stay eligible for readiness reads.
pub const READ_LOW_WATER: usize = 10 * NETWORK_BLOCK;
