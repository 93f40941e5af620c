//! Emulator-wide constants.
//!
//! Single source of truth for numeric limits and defaults.

/// Default service name used when `[shared]` is omitted.
pub const DEFAULT_SERVICE_NAME: &str = "hwsim";

/// Default width of the virtual hardware tick counter, in bits.
pub const DEFAULT_TICK_WIDTH: u8 = 32;

/// Default controller tick frequency (1 MHz).
pub const DEFAULT_CONTROLLER_FREQUENCY_HZ: u64 = 1_000_000;

/// Default timer-wheel / clock-loop frequency (1 kHz).
pub const DEFAULT_TIMER_FREQUENCY_HZ: u64 = 1_000;

/// Default per-object update frequency (1 kHz).
pub const DEFAULT_UPDATE_FREQUENCY_HZ: u64 = 1_000;

/// Default cadence of the pipeline worker threads, in microseconds.
pub const DEFAULT_WORKER_INTERVAL_US: u64 = 200;

/// Initial capacity of the completion ring (power of two).
pub const COMPLETION_RING_CAPACITY: usize = 256;

/// Size of one object-cache segment in bytes.
pub const CACHE_SEGMENT_BYTES: usize = 4096;

/// Sleep used by paused threads and by the pausing caller while polling.
pub const PAUSE_POLL_US: u64 = 100;

/// Maximum number of axes a toolhead aggregates (X, Y, Z, E).
pub const MAX_TOOLHEAD_AXES: usize = 4;

/// Completion result: success.
pub const RESULT_OK: i32 = 0;

/// Completion result: the command was superseded or cancelled by a reset.
pub const RESULT_CANCELLED: i32 = -125;

/// Completion result: the target object was destroyed before completing.
pub const RESULT_TARGET_DESTROYED: i32 = -19;
