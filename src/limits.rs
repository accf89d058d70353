use crate::model::Ms;

/// Lowest numeric priority level; lower value pages first.
pub const MIN_PRIORITY_LEVEL: u8 = 1;
pub const MAX_PRIORITY_LEVEL: u8 = 10;

pub const MAX_SCHEDULES_PER_TEAM: usize = 10_000;
pub const MAX_POLICY_VERSIONS_PER_TEAM: usize = 10_000;
pub const MAX_STEPS_PER_POLICY: usize = 32;
pub const MAX_SERVICES: usize = 100_000;

/// Applies to service names and policy names alike.
pub const MAX_NAME_LEN: usize = 256;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z — anything past this is a caller bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const DAY_MS: Ms = 86_400_000;

/// One coverage interval may span at most a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;

/// Grace margins wider than a day make every schedule conflict.
pub const MAX_GRACE_MS: Ms = DAY_MS;

/// Timeout for the synthetic order-0 on-call link when the policy has no
/// steps to borrow one from.
pub const DEFAULT_CHAIN_TIMEOUT_MIN: u32 = 15;
