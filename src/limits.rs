use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Widest query window accepted by the availability strategies (~10 years).
pub const MAX_QUERY_WINDOW_MS: Ms = 10 * 366 * 86_400_000;

/// Max ids pushed into a single `IN` filter. Larger sets are split into chunks.
pub const MAX_IN_CLAUSE_IDS: usize = 1000;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_LABEL_LEN: usize = 1024;

/// Max rows accepted by one multi-row INSERT into `bookings`.
pub const MAX_BATCH_SIZE: usize = 1000;
