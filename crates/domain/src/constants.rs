//! Domain constants

// Dead-letter diagnostics
pub const MAX_STACK_TRACE_CHARS: usize = 4096;
pub const MAX_RESPONSE_BODY_CHARS: usize = 2048;
pub const DLQ_BREAKER_NAME: &str = "dlq_overflow";

// Realtime delivery
pub const DEFAULT_EVENT_CHANNEL: &str = "security_events";
pub const REPLAY_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 1024;
pub const SUPERVISOR_POLL_SECS: u64 = 30;
pub const MAX_LISTENER_RECOVERY_ATTEMPTS: u32 = 5;
pub const LISTENER_BREAKER_NAME: &str = "event_listener";
pub const FALLBACK_EVENT_TYPE: &str = "event";

// Degradation
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 15;
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;
pub const HEALTH_FAILURE_THRESHOLD: u32 = 3;
pub const HEALTH_RECOVERY_THRESHOLD: u32 = 2;
pub const MEMORY_FALLBACK_CAPACITY: usize = 1000;

// Feature names gated by degradation mode
pub const FEATURE_ALERT_VIEWING: &str = "alert_viewing";
pub const FEATURE_REALTIME_ALERTS: &str = "realtime_alerts";
pub const FEATURE_EVENT_REPLAY: &str = "event_replay";
pub const FEATURE_AI_ANALYSIS: &str = "ai_analysis";
pub const FEATURE_NOTIFICATIONS: &str = "notifications";
pub const FEATURE_EXPORTS: &str = "exports";

/// Every feature known to the default feature table
pub const ALL_FEATURES: [&str; 6] = [
    FEATURE_ALERT_VIEWING,
    FEATURE_REALTIME_ALERTS,
    FEATURE_EVENT_REPLAY,
    FEATURE_AI_ANALYSIS,
    FEATURE_NOTIFICATIONS,
    FEATURE_EXPORTS,
];
