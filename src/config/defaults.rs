//! System-wide default constants.
//!
//! Centralises the numbers the acquisition, analysis and export paths share.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Configuration Discovery
// ============================================================================

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV_VAR: &str = "SLOPEWATCH_CONFIG";

/// Config file looked up in the current working directory.
pub const LOCAL_CONFIG_FILE: &str = "slopewatch.toml";

// ============================================================================
// Analysis
// ============================================================================

/// Scheduling loop period (ms).
pub const UPDATE_INTERVAL_MS: u64 = 1_000;

/// Sliding window length in samples.
///
/// 30 samples at the default 1 Hz cadence = 30 seconds.
pub const SLIDING_WINDOW_SAMPLES: usize = 30;

/// Minimum raw samples before a spectrum is fitted.
pub const MIN_SAMPLES_FOR_SPECTRUM: usize = 4;

/// Minimum positive-frequency bins required for the log-log regression.
pub const MIN_BINS_FOR_FIT: usize = 2;

/// Emotion variable group.
pub const EMOTION_VARIABLES: [&str; 8] = [
    "happy", "surprise", "neutral", "sad", "contempt", "disgust", "fear", "anger",
];

/// Behaviour (landmark / pose) variable group.
pub const BEHAVIOR_VARIABLES: [&str; 11] = [
    "lips",
    "left_eye",
    "right_eye",
    "head",
    "left_shoulder",
    "right_shoulder",
    "left_hand",
    "right_hand",
    "roll",
    "pitch",
    "yaw",
];

/// Prefix producers give to live entity ids.
pub const LIVE_ID_PREFIX: &str = "ID_";

// ============================================================================
// Polling
// ============================================================================

/// Producer status channel poll period while acquisition is active (ms).
pub const STATUS_POLL_INTERVAL_MS: u64 = 200;

/// Batch / export completion poll period (ms).
pub const JOB_POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// Presentation
// ============================================================================

/// Notices retained by the view store; older ones are dropped first.
pub const NOTICE_CAPACITY: usize = 256;

// ============================================================================
// Producer
// ============================================================================

/// How long `start()` waits for a producer's ready handshake (ms).
pub const PRODUCER_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// Grace period between a termination request and a forced kill (ms).
pub const PRODUCER_SHUTDOWN_GRACE_MS: u64 = 3_000;

/// Producer back-off after a mid-stream capture failure (ms).
pub const PRODUCER_ERROR_BACKOFF_MS: u64 = 1_000;

/// In-flight preview frames kept on the frame channel.
pub const FRAME_CHANNEL_CAPACITY: usize = 2;

/// Environment variable carrying the opaque producer settings (JSON) to a
/// producer process.
pub const PRODUCER_SETTINGS_ENV_VAR: &str = "SLOPEWATCH_PRODUCER_SETTINGS";

/// Default synthetic producer population.
pub const SYNTHETIC_ENTITIES: usize = 3;

/// Default synthetic producer capture period (ms).
pub const SYNTHETIC_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Export
// ============================================================================

/// Root directory export folders are created under.
pub const EXPORT_DIR: &str = "exports";

/// Prefix of the timestamped per-run export folder.
pub const EXPORT_FOLDER_PREFIX: &str = "analysis_";

/// chrono format of the export folder timestamp.
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Entity x variable slope table.
pub const FEATURES_CSV: &str = "features.csv";

/// Entity, variable, slope, intercept table.
pub const SLOPES_CSV: &str = "slopes_and_intercepts.csv";

/// Per-entity subdirectory for spectrum views.
pub const SPECTRUM_SUBDIR: &str = "FFT";
