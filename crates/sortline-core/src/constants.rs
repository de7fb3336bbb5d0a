//! Protocol and timing constants shared across the control plane.
//!
//! # Wire Format
//!
//! Every device speaks the same line protocol:
//!
//! ```text
//! <deviceId:1><msgType:1><payload>\n
//! ```
//!
//! | Byte | Values | Meaning |
//! |------|--------|---------|
//! | 0 | `S`, `H`, `G` | sorter, environment, gate |
//! | 1 | `E`, `C`, `R`, `X` | event, command, response, error |
//! | 2.. | device specific | payload |
//!
//! Timing constants are defaults; the daemon overrides most of them from
//! [`RigConfig`](crate::RigConfig).

// ============================================================================
// Framing
// ============================================================================

/// Line terminator for every frame.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Minimum decodable frame: device id plus message type.
pub const MIN_FRAME_LENGTH: usize = 2;

/// Longest line accepted before the stream buffer is discarded.
pub const MAX_LINE_LENGTH: usize = 4 * 1024;

/// Barcode layout: zone(1) + item code(2) + expiry YYMMDD(6).
pub const MIN_BARCODE_LENGTH: usize = 9;

/// Width of the employee id written onto gate cards.
pub const EMPLOYEE_ID_WIDTH: usize = 6;

// ============================================================================
// UDP frames
// ============================================================================

/// Datagram prefix announcing a new frame and its byte size.
pub const FRAME_START_PREFIX: &str = "FRAME_START:";

/// Datagram closing the current frame.
pub const FRAME_END_MARKER: &str = "FRAME_END";

/// Largest frame the reassembler will allocate.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Identical decodes within this window are suppressed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Completed-frame intervals kept for the rolling average.
pub const FRAME_INTERVAL_WINDOW: usize = 5;

// ============================================================================
// Timers
// ============================================================================

/// Sorter auto-stop after this much idle time with nothing waiting.
pub const DEFAULT_AUTO_STOP_TIMEOUT_SECS: u64 = 30;

/// Wait for a gate card write to be confirmed.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 15;

/// Poll interval for blocking reads so shutdown stays responsive.
pub const POLL_INTERVAL_MS: u64 = 200;

/// Backoff before retrying a failed serial operation.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Upper bound on joining a background thread at shutdown.
pub const THREAD_JOIN_TIMEOUT_MS: u64 = 2000;

/// Capacity of each controller inbox.
pub const CONTROLLER_INBOX_CAPACITY: usize = 256;
