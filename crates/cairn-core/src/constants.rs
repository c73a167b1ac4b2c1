//! TigerStyle constants for Cairn
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Reference Limits
// =============================================================================

/// Maximum length of a correlation reference in bytes
pub const REFERENCE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a unit identifier in bytes
pub const UNIT_ID_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Actor Limits
// =============================================================================

/// Maximum depth of an actor's inbound queue
pub const MAILBOX_DEPTH_MAX: usize = 10_000;

/// Default depth of an actor's inbound queue
pub const MAILBOX_DEPTH_DEFAULT: usize = 1024;

/// Maximum number of concurrently running assignments per actor
pub const ASSIGNMENTS_COUNT_MAX: usize = 10_000;

/// Default number of concurrently running assignments per actor
pub const ASSIGNMENTS_COUNT_DEFAULT: usize = 1000;

/// Number of finished assignment references kept for late unassign requests
pub const ASSIGNMENTS_FINISHED_RETAINED_COUNT_DEFAULT: usize = 1024;

/// Time granted to running assignments to unwind on shutdown (5 sec)
pub const ACTOR_SHUTDOWN_GRACE_MS_DEFAULT: u64 = 5 * 1000;

/// Maximum shutdown grace period (2 min)
pub const ACTOR_SHUTDOWN_GRACE_MS_MAX: u64 = 120 * 1000;

// =============================================================================
// Reservation Limits
// =============================================================================

/// Maximum time `acquire` may be bounded by (1 hour)
pub const RESERVATION_TIMEOUT_MS_MAX: u64 = 60 * 60 * 1000;

/// Default number of entries kept in a reservation's visible log
pub const RESERVATION_LOG_ENTRIES_COUNT_DEFAULT: usize = 256;

/// Maximum number of entries kept in a reservation's visible log
pub const RESERVATION_LOG_ENTRIES_COUNT_MAX: usize = 100_000;

/// Reason reported when an unassign loses the race against completion
pub const CANCELLATION_REASON_ALREADY_DONE: &str = "already done";

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total number of provision attempts (counter, labels: status)
pub const METRIC_NAME_PROVISIONS_TOTAL: &str = "cairn_provisions_total";

/// Metric: Total number of reservation operations (counter, labels: operation, status)
pub const METRIC_NAME_RESERVATIONS_TOTAL: &str = "cairn_reservations_total";

/// Metric: Total number of finished assignments (counter, labels: status)
pub const METRIC_NAME_ASSIGNMENTS_TOTAL: &str = "cairn_assignments_total";

/// Metric: Assignment duration in seconds (histogram, labels: status)
pub const METRIC_NAME_ASSIGNMENT_DURATION_SECONDS: &str = "cairn_assignment_duration_seconds";

// Compile-time assertions for constant validity
const _: () = {
    assert!(REFERENCE_LENGTH_BYTES_MAX >= 36); // fits a UUID
    assert!(MAILBOX_DEPTH_DEFAULT <= MAILBOX_DEPTH_MAX);
    assert!(ASSIGNMENTS_COUNT_DEFAULT <= ASSIGNMENTS_COUNT_MAX);
    assert!(ACTOR_SHUTDOWN_GRACE_MS_DEFAULT <= ACTOR_SHUTDOWN_GRACE_MS_MAX);
    assert!(RESERVATION_LOG_ENTRIES_COUNT_DEFAULT <= RESERVATION_LOG_ENTRIES_COUNT_MAX);
};
