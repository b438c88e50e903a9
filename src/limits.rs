//! Hard caps on input sizes and collection growth.

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TYPE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

pub const MAX_RESOURCES_PER_EVENT: usize = 256;
pub const MAX_EVENTS: usize = 100_000;
pub const MAX_RESOURCES: usize = 10_000;

/// Widest utilisation report window, in days.
pub const MAX_REPORT_WINDOW_DAYS: i64 = 3_660;

/// Number of events shown on the dashboard.
pub const DASHBOARD_EVENTS: usize = 3;
