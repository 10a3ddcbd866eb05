/// Caller-supplied reconstruction identifier (always positive once validated).
pub type ModelId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
