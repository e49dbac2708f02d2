//! Hard resource limits. These are ceilings, not tuning knobs — a request
//! that trips one of these is rejected with `LimitExceeded`.

use std::time::Duration;

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_BUSINESSES_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_BUSINESS: usize = 100_000;
pub const MAX_BUSY_BLOCKS_PER_BUSINESS: usize = 10_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 1_000;
pub const MAX_WINDOWS_PER_BUSINESS: usize = 64;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_SOURCE_LEN: usize = 128;

/// A single appointment or busy block longer than this is a client bug.
pub const MAX_SPAN_DURATION_MS: Ms = 30 * 24 * 3_600_000;
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Ceiling on a policy's look-ahead window.
pub const MAX_DAYS_OUT_CEILING: u32 = 730;
/// Longest bookable service.
pub const MAX_SERVICE_DURATION_MIN: u32 = 24 * 60;

/// Bound on waiting for a business write lock during a lifecycle transition.
/// Contended double-booking attempts fail fast instead of queueing.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
