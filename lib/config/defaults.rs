//! Default values used across the orchestrator.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default host serving the remote-desktop gateway.
pub const DEFAULT_GUACAMOLE_HOST: &str = "localhost:8080";

/// The default idle threshold, in minutes, before a running experiment is recycled.
pub const DEFAULT_RECYCLE_MINUTES: i64 = 60;

/// The default number of pre-allocated experiments to keep warm per template.
pub const DEFAULT_PRE_ALLOCATE_NUMBER: i64 = 1;

/// The base period, in seconds, of a pre-allocation sweep when the event does not configure one.
pub const DEFAULT_PRE_ALLOCATE_INTERVAL_BASE_SECS: i64 = 300;

/// Per-event stagger, in seconds, added to the default pre-allocation period to
/// de-synchronize sweeps across events.
pub const PRE_ALLOCATE_INTERVAL_STEP_SECS: i64 = 10;

/// The conventional private web port exposed by virtual machine endpoints.
pub const VM_WEB_PRIVATE_PORT: u16 = 80;

/// The number of experiment-id characters prefixed to generated unit names.
pub const VE_NAME_PREFIX_LEN: usize = 9;

/// The number of random characters suffixed to generated unit names.
pub const VE_NAME_SUFFIX_LEN: usize = 8;
